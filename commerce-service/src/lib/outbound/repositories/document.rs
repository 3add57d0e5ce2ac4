use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::Map;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::QueryBuilder;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::resource::errors::ResourceError;
use crate::domain::resource::kinds::ResourceKind;
use crate::domain::resource::models::Document;
use crate::domain::resource::models::DocumentId;
use crate::domain::resource::ports::ResourceRepository;
use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::UserId;
use crate::outbound::repositories::sql::push_query_clauses;
use crate::outbound::repositories::sql::Table;

const DOCUMENT_COLUMNS: &str = "id, owner_id, slug, data, version, created_at, updated_at";

/// Document store for one resource kind: a table named after the kind's
/// collection, with the envelope in columns and the body in JSONB.
pub struct PostgresDocumentRepository<K: ResourceKind> {
    pool: PgPool,
    kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> PostgresDocumentRepository<K> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            kind: PhantomData,
        }
    }

    fn row_to_document(row: &PgRow) -> Result<Document, ResourceError> {
        let id: Uuid = row.try_get("id").map_err(database_error)?;
        let owner: Option<Uuid> = row.try_get("owner_id").map_err(database_error)?;
        let data: Value = row.try_get("data").map_err(database_error)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(database_error)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(database_error)?;

        let fields = match data {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };

        Ok(Document {
            id: DocumentId(id),
            owner: owner.map(UserId),
            slug: row.try_get("slug").map_err(database_error)?,
            fields,
            version: row.try_get("version").map_err(database_error)?,
            created_at,
            updated_at,
        })
    }

    fn write_error(e: sqlx::Error, document: &Document) -> ResourceError {
        if let Some(db_err) = e.as_database_error() {
            if db_err.is_unique_violation()
                && db_err.constraint() == Some(format!("{}_slug_key", K::COLLECTION).as_str())
            {
                return ResourceError::DuplicateSlug {
                    kind: K::SINGULAR,
                    slug: document.slug.clone().unwrap_or_default(),
                };
            }
        }
        ResourceError::DatabaseError(e.to_string())
    }
}

fn database_error(e: sqlx::Error) -> ResourceError {
    ResourceError::DatabaseError(e.to_string())
}

#[async_trait]
impl<K: ResourceKind> ResourceRepository<K> for PostgresDocumentRepository<K> {
    async fn find_all(&self, spec: &QuerySpec) -> Result<Vec<Value>, ResourceError> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM {}",
            DOCUMENT_COLUMNS,
            K::COLLECTION
        ));
        push_query_clauses(&mut builder, Table::Documents, spec);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        rows.iter()
            .map(|row| {
                let document = Self::row_to_document(row)?;
                Ok(spec.projection.apply(document.render()))
            })
            .collect()
    }

    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, ResourceError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            DOCUMENT_COLUMNS,
            K::COLLECTION
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn find_one_by_slug(&self, slug: &str) -> Result<Option<Document>, ResourceError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE slug = $1",
            DOCUMENT_COLUMNS,
            K::COLLECTION
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn create(&self, document: Document) -> Result<Document, ResourceError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, owner_id, slug, data, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            K::COLLECTION
        ))
        .bind(document.id.0)
        .bind(document.owner.map(|owner| owner.0))
        .bind(document.slug.as_deref())
        .bind(Value::Object(document.fields.clone()))
        .bind(document.version)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::write_error(e, &document))?;

        Ok(document)
    }

    async fn update_by_id(&self, document: Document) -> Result<Option<Document>, ResourceError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET slug = $2, data = $3, version = version + 1, updated_at = $4
            WHERE id = $1 AND version = $5
            RETURNING {}
            "#,
            K::COLLECTION,
            DOCUMENT_COLUMNS
        ))
        .bind(document.id.0)
        .bind(document.slug.as_deref())
        .bind(Value::Object(document.fields.clone()))
        .bind(document.updated_at)
        .bind(document.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::write_error(e, &document))?;

        if let Some(row) = row {
            return Self::row_to_document(&row).map(Some);
        }

        // No row matched: either gone, or its version moved on.
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
            K::COLLECTION
        ))
        .bind(document.id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(database_error)?;

        if exists {
            return Err(ResourceError::VersionConflict {
                kind: K::SINGULAR,
                id: document.id.to_string(),
            });
        }

        Ok(None)
    }

    async fn delete_by_id(&self, id: &DocumentId) -> Result<bool, ResourceError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", K::COLLECTION))
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        Ok(result.rows_affected() > 0)
    }
}
