use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;

use crate::domain::resource::errors::ResourceError;
use crate::domain::resource::kinds::ResourceKind;
use crate::domain::resource::models::Document;
use crate::domain::resource::models::DocumentId;
use crate::domain::resource::models::Expand;
use crate::domain::resource::models::LoadedDocument;
use crate::domain::resource::models::OwnerSummary;
use crate::domain::resource::query::QueryDescriptor;
use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::UserId;

/// Port for the generic resource operations behind every resource route.
#[async_trait]
pub trait ResourceServicePort<K: ResourceKind>: Send + Sync + 'static {
    /// List records through the query pipeline.
    ///
    /// # Arguments
    /// * `descriptor` - Raw query pairs of the request
    ///
    /// # Returns
    /// Rendered, projected page of records
    ///
    /// # Errors
    /// * `InvalidQuery` - Descriptor failed to parse
    /// * `DatabaseError` - Store operation failed
    async fn list(&self, descriptor: &QueryDescriptor) -> Result<Vec<Value>, ResourceError>;

    /// List only records owned by `owner`.
    async fn list_owned(
        &self,
        owner: &UserId,
        descriptor: &QueryDescriptor,
    ) -> Result<Vec<Value>, ResourceError>;

    /// Case-insensitive text search, at most `limit` records.
    async fn search(&self, term: &str, limit: u32) -> Result<Vec<Value>, ResourceError>;

    /// Retrieve one record, optionally eager-loading its owner.
    ///
    /// # Errors
    /// * `NotFound` - No record with this ID
    async fn get_by_id(&self, id: &DocumentId, expand: Expand)
        -> Result<LoadedDocument, ResourceError>;

    /// Retrieve one record by its alternate key.
    ///
    /// # Errors
    /// * `NotFoundBySlug` - No record with this slug
    async fn get_by_slug(&self, slug: &str) -> Result<LoadedDocument, ResourceError>;

    /// Create a record from a request body.
    ///
    /// # Arguments
    /// * `owner` - Owning user, required for owned kinds
    /// * `fields` - Body; envelope fields are ignored
    ///
    /// # Errors
    /// * `Validation` - Body or owner rejected by the kind
    /// * `DuplicateSlug` - Derived slug is taken
    async fn create(
        &self,
        owner: Option<UserId>,
        fields: Map<String, Value>,
    ) -> Result<Document, ResourceError>;

    /// Merge `patch` into a record and re-validate the result.
    ///
    /// The merge is retried against a fresh read when a concurrent write
    /// wins the race.
    ///
    /// # Errors
    /// * `NotFound` - No record with this ID
    /// * `Validation` - Merged body rejected by the kind
    /// * `VersionConflict` - Concurrent writes kept winning
    async fn update(
        &self,
        id: &DocumentId,
        patch: Map<String, Value>,
    ) -> Result<Document, ResourceError>;

    /// Delete a record.
    ///
    /// # Errors
    /// * `NotFound` - No record with this ID, including on repeated deletes
    async fn delete(&self, id: &DocumentId) -> Result<(), ResourceError>;
}

/// Port for resource persistence: the six store capabilities of a kind.
#[async_trait]
pub trait ResourceRepository<K: ResourceKind>: Send + Sync + 'static {
    /// Execute a composed query; results are rendered and projected.
    async fn find_all(&self, spec: &QuerySpec) -> Result<Vec<Value>, ResourceError>;

    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, ResourceError>;

    async fn find_one_by_slug(&self, slug: &str) -> Result<Option<Document>, ResourceError>;

    /// Insert a new record.
    ///
    /// # Errors
    /// * `DuplicateSlug` - Slug already used by another record
    async fn create(&self, document: Document) -> Result<Document, ResourceError>;

    /// Replace an existing record whose stored version still equals
    /// `document.version`, bumping the version.
    ///
    /// # Returns
    /// The stored record, or `None` if it no longer exists
    ///
    /// # Errors
    /// * `VersionConflict` - Another write landed since `document` was read
    /// * `DuplicateSlug` - Slug already used by another record
    async fn update_by_id(&self, document: Document) -> Result<Option<Document>, ResourceError>;

    /// Remove a record.
    ///
    /// # Returns
    /// Whether a record was removed
    async fn delete_by_id(&self, id: &DocumentId) -> Result<bool, ResourceError>;
}

/// Port for resolving a record owner into its public summary.
#[async_trait]
pub trait OwnerDirectory: Send + Sync + 'static {
    async fn owner_summary(&self, id: &UserId) -> Result<Option<OwnerSummary>, ResourceError>;
}
