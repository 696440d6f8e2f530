//! Configuration store and record storage subsystem.
//!
//! # Data Flow
//! ```text
//! projects collection (ProjectDefinition[] + per-project schema)
//!     → ProjectStore::list_projects / get_schema  (read by the orchestrator)
//!     → ProjectStore::watch                       (change feed for the listener)
//!
//! Route synthesis:
//!     CollectionStore::collection("project_module")
//!     → Collection handle bound into a CRUD adapter
//!
//! Module deletion:
//!     CollectionStore::drop_collection("project_module")
//! ```
//!
//! # Design Decisions
//! - The reload core only reads configuration; writes happen through the
//!   admin API or the projects file
//! - Not-found is `Ok(None)`, never an error, so handlers can tell 404 from 500
//! - Collections are lazy: a handle is just a validated name
//! - Reads return a consistent snapshot; no transaction spans two calls

pub mod errors;
pub mod memory;
pub mod seed;
pub mod types;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use types::{
    ChangeEvent, Document, ModuleDefinition, ProjectDefinition, RecordId, SchemaDefinition,
};

/// Ordered stream of configuration changes.
///
/// The stream ends when the feed disconnects; subscribers must call
/// [`ProjectStore::watch`] again.
pub type ChangeFeed = BoxStream<'static, StoreResult<ChangeEvent>>;

/// Read-only view of the projects configuration collection.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// All projects, in the store's read order.
    async fn list_projects(&self) -> StoreResult<Vec<ProjectDefinition>>;

    /// Validation schema registered for a project, if any.
    async fn get_schema(&self, project_id: &str) -> StoreResult<Option<SchemaDefinition>>;

    /// Subscribe to changes on the projects collection.
    async fn watch(&self) -> StoreResult<ChangeFeed>;
}

/// Access to named record collections.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Handle for the named collection. Fails for invalid names, or when the
    /// backend is unreachable.
    async fn collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>>;

    /// Remove a collection and all its records.
    ///
    /// Returns whether anything existed.
    async fn drop_collection(&self, name: &str) -> StoreResult<bool>;
}

/// A single record collection.
#[async_trait]
pub trait Collection: Send + Sync + std::fmt::Debug {
    /// Collection identifier.
    fn name(&self) -> &str;

    /// Persist a new record; the store assigns `_id`.
    async fn insert(&self, fields: Document) -> StoreResult<Document>;

    async fn find_all(&self) -> StoreResult<Vec<Document>>;

    async fn find_by_id(&self, id: &RecordId) -> StoreResult<Option<Document>>;

    /// Merge top-level `changes` into the record, returning the new version.
    async fn update_by_id(&self, id: &RecordId, changes: Document) -> StoreResult<Option<Document>>;

    /// Remove the record, returning what was deleted.
    async fn delete_by_id(&self, id: &RecordId) -> StoreResult<Option<Document>>;
}

/// Checks a name against the collection identifier rules.
pub fn validate_collection_name(name: &str) -> StoreResult<()> {
    let invalid = |reason| StoreError::InvalidCollectionName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(invalid("name is longer than 120 bytes"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("only ASCII letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}

const MAX_COLLECTION_NAME_LEN: usize = 120;
