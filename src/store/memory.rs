//! In-process document store with a change feed.
//!
//! # Responsibilities
//! - Hold the projects collection in insertion order (deterministic reads)
//! - Hold per-project schemas keyed by project id
//! - Publish every configuration write on a bounded broadcast feed
//! - Back record collections, created lazily on first insert

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::store::types::ID_FIELD;
use crate::store::{
    validate_collection_name, ChangeEvent, ChangeFeed, Collection, CollectionStore, Document,
    ModuleDefinition, ProjectDefinition, ProjectStore, RecordId, SchemaDefinition, StoreError,
    StoreResult,
};

type CollectionData = Arc<RwLock<Vec<Document>>>;

/// Document store kept in memory.
///
/// Configuration writes (`insert_project`, `upsert_project`, `delete_project`,
/// `set_schema`) publish a [`ChangeEvent`] while still holding the projects
/// lock, so feed order always matches write order.
#[derive(Debug)]
pub struct MemoryStore {
    projects: RwLock<Vec<ProjectDefinition>>,
    schemas: DashMap<String, SchemaDefinition>,
    collections: Arc<DashMap<String, CollectionData>>,
    feed: Mutex<broadcast::Sender<ChangeEvent>>,
    feed_capacity: usize,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store whose feed buffers `feed_capacity` events per subscriber.
    pub fn new(feed_capacity: usize) -> Self {
        let feed_capacity = feed_capacity.max(1);
        let (tx, _) = broadcast::channel(feed_capacity);
        Self {
            projects: RwLock::new(Vec::new()),
            schemas: DashMap::new(),
            collections: Arc::new(DashMap::new()),
            feed: Mutex::new(tx),
            feed_capacity,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        tracing::info!(available, "Store availability changed");
    }

    /// Close every open change feed. Subscribers must reconnect.
    pub fn reset_feed(&self) {
        let (tx, _) = broadcast::channel(self.feed_capacity);
        let mut feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        *feed = tx;
        tracing::info!("Change feed reset, subscribers disconnected");
    }

    /// Add a new project. Names are unique.
    pub fn insert_project(
        &self,
        name: &str,
        modules: Vec<ModuleDefinition>,
    ) -> StoreResult<ProjectDefinition> {
        self.ensure_available()?;
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        if projects.iter().any(|p| p.name == name) {
            return Err(StoreError::DuplicateProject(name.to_string()));
        }

        let project = ProjectDefinition {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            modules,
        };
        projects.push(project.clone());
        self.publish(ChangeEvent::Inserted {
            current: project.clone(),
        });
        Ok(project)
    }

    /// Replace a project's modules, creating the project if needed.
    pub fn upsert_project(
        &self,
        name: &str,
        modules: Vec<ModuleDefinition>,
    ) -> StoreResult<ProjectDefinition> {
        self.ensure_available()?;
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        match projects.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                let prior = existing.clone();
                existing.modules = modules;
                let current = existing.clone();
                self.publish(ChangeEvent::Updated {
                    prior: Some(prior),
                    current: current.clone(),
                });
                Ok(current)
            }
            None => {
                let project = ProjectDefinition {
                    id: Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    modules,
                };
                projects.push(project.clone());
                self.publish(ChangeEvent::Inserted {
                    current: project.clone(),
                });
                Ok(project)
            }
        }
    }

    /// Remove a project and its schema.
    pub fn delete_project(&self, name: &str) -> StoreResult<Option<ProjectDefinition>> {
        self.ensure_available()?;
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = projects.iter().position(|p| p.name == name) else {
            return Ok(None);
        };

        let prior = projects.remove(index);
        self.schemas.remove(&prior.id);
        self.publish(ChangeEvent::Deleted {
            project_id: prior.id.clone(),
            prior: Some(prior.clone()),
        });
        Ok(Some(prior))
    }

    /// Attach or clear a project's validation schema.
    ///
    /// Schemas are configuration, so an existing project receives an
    /// `Updated` event.
    pub fn set_schema(
        &self,
        project_id: &str,
        schema: Option<SchemaDefinition>,
    ) -> StoreResult<()> {
        self.ensure_available()?;
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        match schema {
            Some(schema) => {
                self.schemas.insert(project_id.to_string(), schema);
            }
            None => {
                self.schemas.remove(project_id);
            }
        }

        if let Some(project) = projects.iter().find(|p| p.id == project_id) {
            self.publish(ChangeEvent::Updated {
                prior: Some(project.clone()),
                current: project.clone(),
            });
        }
        Ok(())
    }

    /// Current projects, bypassing availability checks.
    pub fn projects(&self) -> Vec<ProjectDefinition> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a project by name.
    pub fn project_by_name(&self, name: &str) -> Option<ProjectDefinition> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Schema currently stored for a project, bypassing availability checks.
    pub fn schema_for(&self, project_id: &str) -> Option<SchemaDefinition> {
        self.schemas.get(project_id).map(|s| s.value().clone())
    }

    /// Names of collections that currently hold data, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of records in a collection (0 when it does not exist).
    pub fn record_count(&self, name: &str) -> usize {
        self.collections
            .get(name)
            .map(|data| data.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    fn publish(&self, event: ChangeEvent) {
        let feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(kind = event.kind(), subscribers = feed.receiver_count(), "Publishing change event");
        // No subscribers is fine: the next watcher reloads on connect.
        let _ = feed.send(event);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        check_available(&self.available)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn check_available(flag: &AtomicBool) -> StoreResult<()> {
    if flag.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(StoreError::Unavailable("memory store is offline".to_string()))
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn list_projects(&self) -> StoreResult<Vec<ProjectDefinition>> {
        self.ensure_available()?;
        Ok(self
            .projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn get_schema(&self, project_id: &str) -> StoreResult<Option<SchemaDefinition>> {
        self.ensure_available()?;
        Ok(self.schema_for(project_id))
    }

    async fn watch(&self) -> StoreResult<ChangeFeed> {
        self.ensure_available()?;
        let rx = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe();

        let feed = futures_util::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(RecvError::Lagged(missed)) => Some((Err(StoreError::FeedLagged(missed)), rx)),
                Err(RecvError::Closed) => None,
            }
        });
        Ok(feed.boxed())
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
        validate_collection_name(name)?;
        Ok(Arc::new(MemoryCollection {
            name: name.to_string(),
            collections: self.collections.clone(),
            available: self.available.clone(),
        }))
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<bool> {
        self.ensure_available()?;
        Ok(self.collections.remove(name).is_some())
    }
}

/// Lazy handle onto one named collection.
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    collections: Arc<DashMap<String, CollectionData>>,
    available: Arc<AtomicBool>,
}

impl MemoryCollection {
    fn existing(&self) -> Option<CollectionData> {
        self.collections.get(&self.name).map(|data| data.value().clone())
    }
}

fn has_id(doc: &Document, id: &str) -> bool {
    doc.get(ID_FIELD).and_then(|v| v.as_str()) == Some(id)
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, fields: Document) -> StoreResult<Document> {
        check_available(&self.available)?;
        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), RecordId::generate().to_string().into());
        for (key, value) in fields {
            if key != ID_FIELD {
                doc.insert(key, value);
            }
        }

        let data = self
            .collections
            .entry(self.name.clone())
            .or_default()
            .value()
            .clone();
        data.write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(doc.clone());
        Ok(doc)
    }

    async fn find_all(&self) -> StoreResult<Vec<Document>> {
        check_available(&self.available)?;
        Ok(self
            .existing()
            .map(|data| data.read().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default())
    }

    async fn find_by_id(&self, id: &RecordId) -> StoreResult<Option<Document>> {
        check_available(&self.available)?;
        let id = id.to_string();
        Ok(self.existing().and_then(|data| {
            data.read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .find(|doc| has_id(doc, &id))
                .cloned()
        }))
    }

    async fn update_by_id(&self, id: &RecordId, changes: Document) -> StoreResult<Option<Document>> {
        check_available(&self.available)?;
        let id = id.to_string();
        let Some(data) = self.existing() else {
            return Ok(None);
        };

        let mut docs = data.write().unwrap_or_else(PoisonError::into_inner);
        let Some(doc) = docs.iter_mut().find(|doc| has_id(doc, &id)) else {
            return Ok(None);
        };
        for (key, value) in changes {
            if key != ID_FIELD {
                doc.insert(key, value);
            }
        }
        Ok(Some(doc.clone()))
    }

    async fn delete_by_id(&self, id: &RecordId) -> StoreResult<Option<Document>> {
        check_available(&self.available)?;
        let id = id.to_string();
        let Some(data) = self.existing() else {
            return Ok(None);
        };

        let mut docs = data.write().unwrap_or_else(PoisonError::into_inner);
        Ok(docs
            .iter()
            .position(|doc| has_id(doc, &id))
            .map(|index| docs.remove(index)))
    }
}
