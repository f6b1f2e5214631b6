//! Error types for the ORM core
//!
//! Configuration and unknown-member errors indicate programmer error and are
//! never recovered locally. Stale-data conditions get their own variant so
//! callers can implement retry/merge policies; this layer never auto-retries.

use thiserror::Error;

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for ORM operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// A query composer or relation descriptor is malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Requested relation name has no declaration on the target entity
    #[error("Unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    /// Accessed an undeclared attribute through the dynamic-property path
    #[error("Unknown property '{name}' on entity '{entity}'")]
    UnknownProperty { entity: String, name: String },

    /// Wrote to a read-only computed property (e.g. a relation name)
    #[error("Property '{name}' on entity '{entity}' is read-only")]
    WriteOnlyProperty { entity: String, name: String },

    /// Optimistic-lock version mismatch: the row changed since it was read
    #[error("Stale data: entity '{entity}' was modified concurrently")]
    StaleData { entity: String },

    /// Primary key is missing or unset on an operation that needs it
    #[error("Primary key is missing or invalid for entity '{0}'")]
    MissingPrimaryKey(String),

    /// Record not found
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// Connection-reported failure
    #[error("Database error: {0}")]
    Database(String),

    /// Event listener failure during dispatch
    #[error("Event error: {0}")]
    Event(String),
}

// Connection implementors surface arbitrary driver errors through anyhow.
impl From<anyhow::Error> for OrmError {
    fn from(err: anyhow::Error) -> Self {
        OrmError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Database(err.to_string())
    }
}
