//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the store and seed it from the projects file
//! - Install the first routing table before any traffic is accepted
//! - Start background tasks (reload worker, change listener, file watcher)
//!
//! # Design Decisions
//! - Fail fast: an unreadable projects file or store is fatal at startup
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready); the caller binds them

use axum::Router;
use notify::RecommendedWatcher;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::AppConfig;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::reload::{ChangeListener, ReconnectPolicy, ReloadError, ReloadOrchestrator};
use crate::routing::RouteTable;
use crate::store::seed::{load_projects_file, sync_projects, ProjectsFileWatcher, SeedError};
use crate::store::MemoryStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("projects file: {0}")]
    ProjectsFile(#[from] SeedError),

    #[error("cannot watch projects file: {0}")]
    Watch(#[from] notify::Error),

    #[error("initial reload failed: {0}")]
    InitialReload(#[from] ReloadError),
}

/// The running reconfiguration engine.
pub struct Engine {
    pub store: Arc<MemoryStore>,
    pub routes: Arc<RouteTable>,
    pub orchestrator: Arc<ReloadOrchestrator>,
    tasks: Vec<JoinHandle<()>>,
    /// Held so file events keep flowing.
    _watcher: Option<RecommendedWatcher>,
}

impl Engine {
    /// Start with a fresh store built from `config`.
    pub async fn start(config: &AppConfig, shutdown: &Shutdown) -> Result<Self, StartupError> {
        let store = Arc::new(MemoryStore::new(config.store.change_feed_capacity));
        Self::start_with_store(config, store, shutdown).await
    }

    /// Start on an existing store.
    pub async fn start_with_store(
        config: &AppConfig,
        store: Arc<MemoryStore>,
        shutdown: &Shutdown,
    ) -> Result<Self, StartupError> {
        if let Some(path) = &config.store.projects_file {
            let file = load_projects_file(Path::new(path))?;
            let summary = sync_projects(&store, &file)?;
            tracing::info!(
                path = %path,
                projects = file.projects.len(),
                inserted = summary.inserted,
                "Projects file loaded"
            );
        }

        let routes = Arc::new(RouteTable::new());
        let orchestrator = ReloadOrchestrator::new(store.clone(), store.clone(), routes.clone());

        let initial = orchestrator.reload_now().await?;
        tracing::info!(
            routes = initial.routes,
            skipped = initial.skipped.len(),
            "Initial routing table installed"
        );

        let mut tasks = Vec::new();
        if let Some(worker) = orchestrator.spawn(shutdown.subscribe()) {
            tasks.push(worker);
        }

        let listener = ChangeListener::new(
            store.clone(),
            store.clone(),
            orchestrator.clone(),
            ReconnectPolicy::from_config(&config.reload),
        );
        tasks.push(tokio::spawn(listener.run(shutdown.subscribe())));

        let watcher = match &config.store.projects_file {
            Some(path) if config.store.watch_projects_file => {
                Some(ProjectsFileWatcher::new(Path::new(path), store.clone()).run()?)
            }
            _ => None,
        };

        Ok(Self {
            store,
            routes,
            orchestrator,
            tasks,
            _watcher: watcher,
        })
    }

    pub fn http_server(&self, config: &AppConfig) -> HttpServer {
        HttpServer::new(config, self.routes.clone())
    }

    pub fn admin_router(&self, config: &AppConfig) -> Router {
        setup_admin_router(AdminState {
            store: self.store.clone(),
            orchestrator: self.orchestrator.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        })
    }

    /// Wait for the background tasks to finish after shutdown fired.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}
