use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::resource::errors::DocumentIdError;
use crate::domain::user::models::User;
use crate::domain::user::models::UserId;

/// Field names owned by the document envelope rather than its body.
pub const ENVELOPE_FIELDS: [&str; 6] = ["id", "user", "slug", "createdAt", "updatedAt", "__v"];

/// Document unique identifier type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a document ID from a path segment.
    ///
    /// # Errors
    /// * `InvalidFormat` - String is not a valid UUID
    pub fn from_string(kind: &'static str, s: &str) -> Result<Self, DocumentIdError> {
        Uuid::parse_str(s)
            .map(DocumentId)
            .map_err(|_| DocumentIdError::InvalidFormat {
                kind,
                value: s.to_string(),
            })
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A stored record of some resource kind.
///
/// The envelope (id, owner, slug, timestamps, version) is typed; the body is
/// an open JSON object validated by the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub owner: Option<UserId>,
    pub slug: Option<String>,
    pub fields: Map<String, Value>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Fresh document with an empty envelope stamped at `now`.
    pub fn new(owner: Option<UserId>, fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            id: DocumentId::new(),
            owner,
            slug: None,
            fields,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// JSON shape seen by clients and by the query pipeline.
    pub fn render(&self) -> Value {
        let mut rendered = self.fields.clone();
        rendered.insert("id".to_string(), Value::String(self.id.to_string()));
        if let Some(owner) = self.owner {
            rendered.insert("user".to_string(), Value::String(owner.to_string()));
        }
        if let Some(slug) = &self.slug {
            rendered.insert("slug".to_string(), Value::String(slug.clone()));
        }
        rendered.insert("createdAt".to_string(), timestamp(self.created_at));
        rendered.insert("updatedAt".to_string(), timestamp(self.updated_at));
        rendered.insert("__v".to_string(), Value::from(self.version));
        Value::Object(rendered)
    }
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

/// Public view of a document's owner, used for eager loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerSummary {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&User> for OwnerSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.as_str().to_string(),
            email: user.email.as_str().to_string(),
            name: user.name.clone(),
        }
    }
}

/// A document together with the related records requested by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub document: Document,
    pub owner: Option<OwnerSummary>,
}

impl LoadedDocument {
    pub fn plain(document: Document) -> Self {
        Self {
            document,
            owner: None,
        }
    }

    /// Rendered document with `user` replaced by the owner summary when loaded.
    pub fn render(&self) -> Value {
        let mut rendered = self.document.render();
        if let (Some(owner), Value::Object(fields)) = (&self.owner, &mut rendered) {
            if let Ok(owner) = serde_json::to_value(owner) {
                fields.insert("user".to_string(), owner);
            }
        }
        fields_without_internal(rendered)
    }
}

fn fields_without_internal(mut rendered: Value) -> Value {
    if let Value::Object(fields) = &mut rendered {
        fields.remove("__v");
    }
    rendered
}

/// Whether eager loading of related records is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    None,
    Owner,
}
