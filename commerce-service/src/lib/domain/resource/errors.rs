use thiserror::Error;

/// Error for query descriptor parsing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid field name: {0:?}")]
    InvalidField(String),

    #[error("Unknown comparison operator {operator:?} on field {field:?}")]
    UnknownOperator { field: String, operator: String },

    #[error("Projection cannot mix included and excluded fields")]
    MixedProjection,
}

/// Error for DocumentId parsing failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentIdError {
    #[error("Invalid {kind} id: {value}")]
    InvalidFormat { kind: &'static str, value: String },
}

/// Top-level error for resource operations
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error(transparent)]
    InvalidId(#[from] DocumentIdError),

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("{kind} validation failed: {message}")]
    Validation { kind: &'static str, message: String },

    #[error("No {kind} found with the given ID: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("No {kind} found with the given SLUG: {slug}")]
    NotFoundBySlug { kind: &'static str, slug: String },

    #[error("A {kind} with slug {slug:?} already exists")]
    DuplicateSlug { kind: &'static str, slug: String },

    #[error("The {kind} {id} was modified concurrently, please retry")]
    VersionConflict { kind: &'static str, id: String },

    #[error("Owner lookup failed: {0}")]
    OwnerLookup(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ResourceError {
    pub fn validation(kind: &'static str, message: impl Into<String>) -> Self {
        ResourceError::Validation {
            kind,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ResourceError {
    fn from(err: anyhow::Error) -> Self {
        ResourceError::Unknown(err.to_string())
    }
}
