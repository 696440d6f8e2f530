//! Projects file: seeding and live sync of the configuration collection.
//!
//! ```toml
//! [[projects]]
//! name = "shop"
//!
//! [[projects.modules]]
//! name = "orders"
//! fields = ["item", "qty"]
//!
//! [projects.schema]
//! type = "object"
//! required = ["item"]
//! ```

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::store::{MemoryStore, ModuleDefinition, ProjectDefinition, SchemaDefinition, StoreError};

/// Parsed projects file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectsFile {
    #[serde(default)]
    pub projects: Vec<SeedProject>,
}

/// One project as declared in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedProject {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
    #[serde(default)]
    pub schema: Option<Value>,
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("cannot read projects file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse projects file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot apply projects file: {0}")]
    Store(#[from] StoreError),
}

/// Counts of writes applied by [`sync_projects`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub schemas: usize,
}

impl SyncSummary {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub fn parse_projects(content: &str) -> Result<ProjectsFile, SeedError> {
    Ok(toml::from_str(content)?)
}

pub fn load_projects_file(path: &Path) -> Result<ProjectsFile, SeedError> {
    let content = fs::read_to_string(path)?;
    parse_projects(&content)
}

/// Make the store's projects match the file.
///
/// Only differences are written, so syncing the same file twice publishes
/// nothing the second time. Projects missing from the file are deleted.
pub fn sync_projects(store: &MemoryStore, file: &ProjectsFile) -> Result<SyncSummary, SeedError> {
    let mut summary = SyncSummary::default();

    for seed in &file.projects {
        apply_project(store, seed, &mut summary)?;
    }

    for existing in store.projects() {
        if !file.projects.iter().any(|seed| seed.name == existing.name) {
            summary.deleted += 1;
            store.delete_project(&existing.name)?;
        }
    }

    Ok(summary)
}

/// Make one stored project match its declaration, writing only differences.
pub fn apply_project(
    store: &MemoryStore,
    seed: &SeedProject,
    summary: &mut SyncSummary,
) -> Result<ProjectDefinition, StoreError> {
    let project = match store.project_by_name(&seed.name) {
        None => {
            summary.inserted += 1;
            store.insert_project(&seed.name, seed.modules.clone())?
        }
        Some(existing) if existing.modules != seed.modules => {
            summary.updated += 1;
            store.upsert_project(&seed.name, seed.modules.clone())?
        }
        Some(existing) => existing,
    };

    let desired = seed.schema.clone().map(SchemaDefinition);
    if store.schema_for(&project.id) != desired {
        summary.schemas += 1;
        store.set_schema(&project.id, desired)?;
    }
    Ok(project)
}

/// Watches the projects file and re-syncs the store on change.
pub struct ProjectsFileWatcher {
    path: PathBuf,
    store: Arc<MemoryStore>,
}

impl ProjectsFileWatcher {
    pub fn new(path: &Path, store: Arc<MemoryStore>) -> Self {
        Self {
            path: path.to_path_buf(),
            store,
        }
    }

    /// Start watching on notify's background thread.
    ///
    /// The parent directory is watched rather than the file itself, so
    /// editors that save by renaming a temporary file are picked up too.
    /// The returned watcher must be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let store = self.store;
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_file && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::info!(path = ?path, "Projects file change detected");
                        reapply(&path, &store);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Projects file watcher started");
        Ok(watcher)
    }
}

fn reapply(path: &Path, store: &MemoryStore) {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read projects file. Keeping current configuration.");
            return;
        }
    };
    // Truncate-then-write saves show up as an empty file first.
    if content.trim().is_empty() {
        tracing::debug!("Projects file empty, waiting for the write to finish");
        return;
    }

    match parse_projects(&content).and_then(|file| sync_projects(store, &file)) {
        Ok(summary) if summary.is_noop() => tracing::debug!("Projects file unchanged"),
        Ok(summary) => tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            schemas = summary.schemas,
            "Projects file applied"
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to apply projects file. Keeping current configuration.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHOP: &str = r#"
        [[projects]]
        name = "shop"

        [[projects.modules]]
        name = "orders"
        fields = ["item"]

        [projects.schema]
        type = "object"
        required = ["item"]

        [[projects]]
        name = "blog"
        modules = [{ name = "posts" }]
    "#;

    #[test]
    fn test_parse_projects_file() {
        let file = parse_projects(SHOP).unwrap();
        assert_eq!(file.projects.len(), 2);
        assert_eq!(file.projects[0].modules[0].fields, vec!["item"]);
        assert_eq!(
            file.projects[0].schema,
            Some(json!({"type": "object", "required": ["item"]}))
        );
        assert!(file.projects[1].schema.is_none());
        assert!(file.projects[1].modules[0].fields.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_file() {
        assert!(matches!(
            parse_projects("[[projects]]\nmodules = 3"),
            Err(SeedError::Parse(_))
        ));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let store = MemoryStore::default();
        let file = parse_projects(SHOP).unwrap();

        let first = sync_projects(&store, &file).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.schemas, 1);

        let second = sync_projects(&store, &file).unwrap();
        assert!(second.is_noop());
    }

    #[test]
    fn test_sync_updates_and_deletes() {
        let store = MemoryStore::default();
        sync_projects(&store, &parse_projects(SHOP).unwrap()).unwrap();
        let shop_id = store.project_by_name("shop").unwrap().id;

        let next = parse_projects(
            r#"
            [[projects]]
            name = "shop"
            modules = [{ name = "orders", fields = ["item"] }, { name = "refunds" }]
            "#,
        )
        .unwrap();
        let summary = sync_projects(&store, &next).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.schemas, 1, "schema removed from file is cleared");

        let shop = store.project_by_name("shop").unwrap();
        assert_eq!(shop.id, shop_id, "identity survives updates");
        assert_eq!(shop.modules.len(), 2);
        assert!(store.project_by_name("blog").is_none());
        assert!(store.schema_for(&shop_id).is_none());
    }
}
