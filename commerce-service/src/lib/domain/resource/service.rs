use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;
use serde_json::Value;

use crate::domain::resource::errors::ResourceError;
use crate::domain::resource::kinds::slugify;
use crate::domain::resource::kinds::ResourceKind;
use crate::domain::resource::models::Document;
use crate::domain::resource::models::DocumentId;
use crate::domain::resource::models::Expand;
use crate::domain::resource::models::LoadedDocument;
use crate::domain::resource::models::ENVELOPE_FIELDS;
use crate::domain::resource::ports::OwnerDirectory;
use crate::domain::resource::ports::ResourceRepository;
use crate::domain::resource::ports::ResourceServicePort;
use crate::domain::resource::query::Constraint;
use crate::domain::resource::query::FieldPath;
use crate::domain::resource::query::Pagination;
use crate::domain::resource::query::QueryDescriptor;
use crate::domain::resource::query::QueryOptions;
use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::UserId;

/// Read-merge-write rounds an update makes before giving up.
const UPDATE_ATTEMPTS: u32 = 3;

/// Domain service implementing the generic resource operations for one kind.
pub struct ResourceService<K, R, O>
where
    K: ResourceKind,
    R: ResourceRepository<K>,
    O: OwnerDirectory,
{
    repository: Arc<R>,
    owners: Arc<O>,
    max_page_size: Option<u32>,
    kind: PhantomData<fn() -> K>,
}

impl<K, R, O> ResourceService<K, R, O>
where
    K: ResourceKind,
    R: ResourceRepository<K>,
    O: OwnerDirectory,
{
    /// Create a new resource service with injected dependencies.
    ///
    /// # Arguments
    /// * `repository` - Store for this kind
    /// * `owners` - Resolves owners for eager loading and owner checks
    /// * `max_page_size` - Page size ceiling for listings
    pub fn new(repository: Arc<R>, owners: Arc<O>, max_page_size: Option<u32>) -> Self {
        Self {
            repository,
            owners,
            max_page_size,
            kind: PhantomData,
        }
    }

    fn options(&self) -> QueryOptions {
        QueryOptions {
            default_sort: K::DEFAULT_SORT,
            max_page_size: self.max_page_size,
        }
    }

    fn not_found(id: &DocumentId) -> ResourceError {
        ResourceError::NotFound {
            kind: K::SINGULAR,
            id: id.to_string(),
        }
    }

    /// Fill defaults, validate, and derive the slug.
    fn finalize(&self, document: &mut Document) -> Result<(), ResourceError> {
        K::prepare(&mut document.fields);
        K::validate(&document.fields)?;

        if K::SLUGGED {
            let title = document
                .fields
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let slug = slugify(title);
            if slug.is_empty() {
                return Err(ResourceError::validation(
                    K::SINGULAR,
                    "title must contain at least one letter or digit",
                ));
            }
            document.slug = Some(slug);
        }

        Ok(())
    }
}

/// Drop fields owned by the envelope from a client body.
fn without_envelope(mut fields: Map<String, Value>) -> Map<String, Value> {
    for name in ENVELOPE_FIELDS {
        fields.remove(name);
    }
    fields
}

#[async_trait]
impl<K, R, O> ResourceServicePort<K> for ResourceService<K, R, O>
where
    K: ResourceKind,
    R: ResourceRepository<K>,
    O: OwnerDirectory,
{
    async fn list(&self, descriptor: &QueryDescriptor) -> Result<Vec<Value>, ResourceError> {
        let spec = QuerySpec::from_descriptor(descriptor, &self.options())?;
        self.repository.find_all(&spec).await
    }

    async fn list_owned(
        &self,
        owner: &UserId,
        descriptor: &QueryDescriptor,
    ) -> Result<Vec<Value>, ResourceError> {
        let spec = QuerySpec::from_descriptor(descriptor, &self.options())?
            .with_constraint(Constraint::equals(FieldPath::parse("user")?, owner.to_string()));
        self.repository.find_all(&spec).await
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<Value>, ResourceError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let spec = QuerySpec {
            search: Some(term.to_string()),
            pagination: Pagination { page: 1, limit },
            ..QuerySpec::unfiltered()
        };
        self.repository.find_all(&spec).await
    }

    async fn get_by_id(
        &self,
        id: &DocumentId,
        expand: Expand,
    ) -> Result<LoadedDocument, ResourceError> {
        let document = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| Self::not_found(id))?;

        let owner = match (expand, document.owner) {
            (Expand::Owner, Some(owner)) => self.owners.owner_summary(&owner).await?,
            _ => None,
        };

        Ok(LoadedDocument { document, owner })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<LoadedDocument, ResourceError> {
        self.repository
            .find_one_by_slug(slug)
            .await?
            .map(LoadedDocument::plain)
            .ok_or_else(|| ResourceError::NotFoundBySlug {
                kind: K::SINGULAR,
                slug: slug.to_string(),
            })
    }

    async fn create(
        &self,
        owner: Option<UserId>,
        fields: Map<String, Value>,
    ) -> Result<Document, ResourceError> {
        let owner = match (K::OWNED, owner) {
            (true, Some(owner)) => {
                if self.owners.owner_summary(&owner).await?.is_none() {
                    return Err(ResourceError::validation(
                        K::SINGULAR,
                        format!("no user exists with ID {}", owner),
                    ));
                }
                Some(owner)
            }
            (true, None) => {
                return Err(ResourceError::validation(
                    K::SINGULAR,
                    format!("A {} must belong to a user", K::SINGULAR),
                ))
            }
            (false, _) => None,
        };

        let mut document = Document::new(owner, without_envelope(fields), Utc::now());
        self.finalize(&mut document)?;

        let created = self.repository.create(document).await?;
        tracing::info!(kind = K::SINGULAR, id = %created.id, "Resource created");

        Ok(created)
    }

    async fn update(
        &self,
        id: &DocumentId,
        patch: Map<String, Value>,
    ) -> Result<Document, ResourceError> {
        let patch = without_envelope(patch);
        let mut attempt = 1;

        loop {
            let mut document = self
                .repository
                .find_by_id(id)
                .await?
                .ok_or_else(|| Self::not_found(id))?;

            document.fields.extend(patch.clone());
            self.finalize(&mut document)?;
            document.updated_at = Utc::now();

            match self.repository.update_by_id(document).await {
                Err(ResourceError::VersionConflict { .. }) if attempt < UPDATE_ATTEMPTS => {
                    tracing::debug!(
                        kind = K::SINGULAR,
                        id = %id,
                        attempt,
                        "Update raced, retrying"
                    );
                    attempt += 1;
                }
                result => {
                    return result.and_then(|stored| stored.ok_or_else(|| Self::not_found(id)));
                }
            }
        }
    }

    async fn delete(&self, id: &DocumentId) -> Result<(), ResourceError> {
        if !self.repository.delete_by_id(id).await? {
            return Err(Self::not_found(id));
        }

        tracing::info!(kind = K::SINGULAR, id = %id, "Resource deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockall::mock;
    use serde_json::json;

    use super::*;
    use crate::domain::resource::kinds::Cart;
    use crate::domain::resource::kinds::Product;
    use crate::domain::resource::models::OwnerSummary;

    mock! {
        pub ProductRepository {}

        #[async_trait]
        impl ResourceRepository<Product> for ProductRepository {
            async fn find_all(&self, spec: &QuerySpec) -> Result<Vec<Value>, ResourceError>;
            async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, ResourceError>;
            async fn find_one_by_slug(&self, slug: &str) -> Result<Option<Document>, ResourceError>;
            async fn create(&self, document: Document) -> Result<Document, ResourceError>;
            async fn update_by_id(&self, document: Document) -> Result<Option<Document>, ResourceError>;
            async fn delete_by_id(&self, id: &DocumentId) -> Result<bool, ResourceError>;
        }
    }

    mock! {
        pub CartRepository {}

        #[async_trait]
        impl ResourceRepository<Cart> for CartRepository {
            async fn find_all(&self, spec: &QuerySpec) -> Result<Vec<Value>, ResourceError>;
            async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, ResourceError>;
            async fn find_one_by_slug(&self, slug: &str) -> Result<Option<Document>, ResourceError>;
            async fn create(&self, document: Document) -> Result<Document, ResourceError>;
            async fn update_by_id(&self, document: Document) -> Result<Option<Document>, ResourceError>;
            async fn delete_by_id(&self, id: &DocumentId) -> Result<bool, ResourceError>;
        }
    }

    mock! {
        pub Owners {}

        #[async_trait]
        impl OwnerDirectory for Owners {
            async fn owner_summary(&self, id: &UserId) -> Result<Option<OwnerSummary>, ResourceError>;
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(fields) => fields,
            _ => panic!("expected object"),
        }
    }

    fn product(title: &str) -> Document {
        let mut document = Document::new(None, fields(json!({"title": title, "price": 10})), Utc::now());
        document.slug = Some(slugify(title));
        document
    }

    fn product_service(
        repository: MockProductRepository,
        owners: MockOwners,
        max_page_size: Option<u32>,
    ) -> ResourceService<Product, MockProductRepository, MockOwners> {
        ResourceService::new(Arc::new(repository), Arc::new(owners), max_page_size)
    }

    fn cart_service(
        repository: MockCartRepository,
        owners: MockOwners,
    ) -> ResourceService<Cart, MockCartRepository, MockOwners> {
        ResourceService::new(Arc::new(repository), Arc::new(owners), None)
    }

    fn summary(id: UserId) -> OwnerSummary {
        OwnerSummary {
            id: id.to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_list_applies_default_sort_and_page_ceiling() {
        let mut repository = MockProductRepository::new();
        repository
            .expect_find_all()
            .withf(|spec| {
                spec.sort.len() == 1
                    && spec.sort[0].field.as_str() == "createdAt"
                    && spec.pagination.limit == 50
            })
            .times(1)
            .returning(|_| Ok(vec![json!({"title": "Boot"})]));

        let service = product_service(repository, MockOwners::new(), Some(50));
        let descriptor = vec![("limit".to_string(), "500".to_string())];

        let result = service.list(&descriptor).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_descriptor() {
        let mut repository = MockProductRepository::new();
        repository.expect_find_all().times(0);

        let service = product_service(repository, MockOwners::new(), None);
        let descriptor = vec![("price[ne]".to_string(), "1".to_string())];

        assert!(matches!(
            service.list(&descriptor).await,
            Err(ResourceError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_list_owned_adds_owner_constraint() {
        let owner = UserId::new();
        let expected = owner.to_string();
        let mut repository = MockCartRepository::new();
        repository
            .expect_find_all()
            .withf(move |spec| {
                spec.filter
                    .iter()
                    .any(|c| c.field.as_str() == "user" && c.raw == expected)
            })
            .times(1)
            .returning(|_| Ok(vec![]));

        let service = cart_service(repository, MockOwners::new());

        assert!(service.list_owned(&owner, &Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_product_derives_slug_and_strips_envelope() {
        let mut repository = MockProductRepository::new();
        repository
            .expect_create()
            .withf(|document| {
                document.slug.as_deref() == Some("trail-boot")
                    && document.owner.is_none()
                    && !document.fields.contains_key("id")
                    && !document.fields.contains_key("__v")
            })
            .times(1)
            .returning(Ok);

        let service = product_service(repository, MockOwners::new(), None);
        let body = fields(json!({"title": "Trail Boot", "price": 99, "id": "x", "__v": 7}));

        let created = service.create(None, body).await.unwrap();
        assert_eq!(created.fields["price"], 99);
    }

    #[tokio::test]
    async fn test_create_product_invalid_body() {
        let mut repository = MockProductRepository::new();
        repository.expect_create().times(0);

        let service = product_service(repository, MockOwners::new(), None);

        let result = service.create(None, fields(json!({"price": 1}))).await;
        assert!(matches!(result, Err(ResourceError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_create_cart_requires_existing_owner() {
        let mut repository = MockCartRepository::new();
        repository.expect_create().times(0);
        let mut owners = MockOwners::new();
        owners.expect_owner_summary().times(1).returning(|_| Ok(None));

        let service = cart_service(repository, owners);

        let missing_owner = service.create(None, Map::new()).await;
        assert!(matches!(missing_owner, Err(ResourceError::Validation { .. })));

        let unknown_owner = service.create(Some(UserId::new()), Map::new()).await;
        assert!(matches!(unknown_owner, Err(ResourceError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_get_by_id_expands_owner() {
        let owner = UserId::new();
        let mut document = Document::new(Some(owner), fields(json!({"products": []})), Utc::now());
        document.version = 1;
        let id = document.id;

        let mut repository = MockCartRepository::new();
        let stored = document.clone();
        repository
            .expect_find_by_id()
            .times(1)
            .returning(move |_| Ok(Some(stored.clone())));
        let mut owners = MockOwners::new();
        owners
            .expect_owner_summary()
            .withf(move |id| *id == owner)
            .times(1)
            .returning(|id| Ok(Some(summary(*id))));

        let service = cart_service(repository, owners);

        let loaded = service.get_by_id(&id, Expand::Owner).await.unwrap();
        assert_eq!(loaded.owner.as_ref().map(|o| o.username.as_str()), Some("alice"));
        assert_eq!(loaded.render()["user"]["id"], owner.to_string());
    }

    #[tokio::test]
    async fn test_get_by_id_absent_is_not_found() {
        let mut repository = MockProductRepository::new();
        repository.expect_find_by_id().returning(|_| Ok(None));

        let service = product_service(repository, MockOwners::new(), None);
        let id = DocumentId::new();

        for _ in 0..2 {
            assert!(matches!(
                service.get_by_id(&id, Expand::None).await,
                Err(ResourceError::NotFound { kind: "product", .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_get_by_slug_not_found() {
        let mut repository = MockProductRepository::new();
        repository.expect_find_one_by_slug().returning(|_| Ok(None));

        let service = product_service(repository, MockOwners::new(), None);

        assert!(matches!(
            service.get_by_slug("nope").await,
            Err(ResourceError::NotFoundBySlug { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_merges_and_reslugs() {
        let existing = product("Old Name");
        let id = existing.id;

        let mut repository = MockProductRepository::new();
        repository
            .expect_find_by_id()
            .times(1)
            .returning(move |_| Ok(Some(existing.clone())));
        repository
            .expect_update_by_id()
            .withf(|document| {
                document.slug.as_deref() == Some("new-name")
                    && document.fields["price"] == 10
                    && document.fields["title"] == "New Name"
            })
            .times(1)
            .returning(|document| Ok(Some(document)));

        let service = product_service(repository, MockOwners::new(), None);

        let updated = service
            .update(&id, fields(json!({"title": "New Name"})))
            .await
            .unwrap();
        assert_eq!(updated.slug.as_deref(), Some("new-name"));
    }

    #[tokio::test]
    async fn test_update_retries_on_fresh_read_after_lost_race() {
        let stale = product("Boot");
        let id = stale.id;
        let mut fresh = stale.clone();
        fresh.version = 1;
        fresh.fields.insert("stock".to_string(), json!(4));

        let mut reads = 0;
        let mut repository = MockProductRepository::new();
        repository
            .expect_find_by_id()
            .times(2)
            .returning(move |_| {
                reads += 1;
                let snapshot = if reads == 1 { &stale } else { &fresh };
                Ok(Some(snapshot.clone()))
            });
        repository
            .expect_update_by_id()
            .withf(|document| document.version == 0)
            .times(1)
            .returning(|document| {
                Err(ResourceError::VersionConflict {
                    kind: "product",
                    id: document.id.to_string(),
                })
            });
        repository
            .expect_update_by_id()
            .withf(|document| document.version == 1)
            .times(1)
            .returning(|mut document| {
                document.version += 1;
                Ok(Some(document))
            });

        let service = product_service(repository, MockOwners::new(), None);

        let updated = service
            .update(&id, fields(json!({"price": 12})))
            .await
            .unwrap();
        assert_eq!(updated.fields["price"], 12);
        assert_eq!(updated.fields["stock"], 4);
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_update_gives_up_after_repeated_conflicts() {
        let existing = product("Boot");
        let id = existing.id;

        let mut repository = MockProductRepository::new();
        repository
            .expect_find_by_id()
            .times(UPDATE_ATTEMPTS as usize)
            .returning(move |_| Ok(Some(existing.clone())));
        repository
            .expect_update_by_id()
            .times(UPDATE_ATTEMPTS as usize)
            .returning(|document| {
                Err(ResourceError::VersionConflict {
                    kind: "product",
                    id: document.id.to_string(),
                })
            });

        let service = product_service(repository, MockOwners::new(), None);

        assert!(matches!(
            service.update(&id, fields(json!({"price": 12}))).await,
            Err(ResourceError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_revalidates_full_document() {
        let existing = product("Boot");
        let id = existing.id;

        let mut repository = MockProductRepository::new();
        repository
            .expect_find_by_id()
            .returning(move |_| Ok(Some(existing.clone())));
        repository.expect_update_by_id().times(0);

        let service = product_service(repository, MockOwners::new(), None);

        let result = service.update(&id, fields(json!({"price": "free"}))).await;
        assert!(matches!(result, Err(ResourceError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_update_absent_is_not_found() {
        let mut repository = MockProductRepository::new();
        repository.expect_find_by_id().returning(|_| Ok(None));

        let service = product_service(repository, MockOwners::new(), None);

        assert!(matches!(
            service.update(&DocumentId::new(), Map::new()).await,
            Err(ResourceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_twice_is_not_found_the_second_time() {
        let mut repository = MockProductRepository::new();
        let mut deleted = false;
        repository.expect_delete_by_id().times(2).returning(move |_| {
            let existed = !deleted;
            deleted = true;
            Ok(existed)
        });

        let service = product_service(repository, MockOwners::new(), None);
        let id = DocumentId::new();

        assert!(service.delete(&id).await.is_ok());
        assert!(matches!(
            service.delete(&id).await,
            Err(ResourceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_search_empty_term_skips_store() {
        let mut repository = MockProductRepository::new();
        repository.expect_find_all().times(0);

        let service = product_service(repository, MockOwners::new(), None);

        assert!(service.search("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_limits_results() {
        let mut repository = MockProductRepository::new();
        repository
            .expect_find_all()
            .withf(|spec| spec.search.as_deref() == Some("boot") && spec.pagination.limit == 5)
            .times(1)
            .returning(|_| Ok(vec![]));

        let service = product_service(repository, MockOwners::new(), None);

        assert!(service.search("boot", 5).await.is_ok());
    }
}
