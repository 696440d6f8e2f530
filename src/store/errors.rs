//! Store error definitions.

use thiserror::Error;

/// Errors surfaced by the configuration store and record collections.
///
/// Missing records are not errors: collection lookups return `Ok(None)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The name cannot be used as a collection identifier.
    #[error("invalid collection name '{name}': {reason}")]
    InvalidCollectionName { name: String, reason: &'static str },

    /// A project with this name already exists.
    #[error("project '{0}' already exists")]
    DuplicateProject(String),

    /// The change feed dropped events for a slow subscriber.
    #[error("change feed lagged, {0} events lost")]
    FeedLagged(u64),

    /// Any other storage failure.
    #[error("storage operation failed: {0}")]
    Operation(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
