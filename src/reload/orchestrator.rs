//! Reconfiguration orchestrator.
//!
//! # States
//! ```text
//! Idle → Reloading: startup, change notification, admin request, SIGHUP
//! Reloading → Idle: table installed, or configuration read failed (old table kept)
//! ```
//!
//! # Coalescing
//! Triggers go into a queue of depth one. While a cycle runs, the first
//! trigger fills the slot and every further trigger is absorbed by it, so a
//! burst of N triggers costs at most one extra cycle, and that cycle always
//! re-reads the newest configuration.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::routing::{synthesize, RouteSynthesisError, RouteTable, RoutingTable};
use crate::store::{CollectionStore, ProjectStore, StoreError};
use crate::validator::{compile, Validator};

/// Orchestrator state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadState {
    Idle = 0,
    Reloading = 1,
}

impl From<u8> for ReloadState {
    fn from(val: u8) -> Self {
        match val {
            1 => ReloadState::Reloading,
            _ => ReloadState::Idle,
        }
    }
}

/// A reload cycle that installed nothing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReloadError {
    /// The configuration store could not be read; the previous table stays active.
    #[error("configuration read failed: {0}")]
    ConfigRead(#[source] StoreError),
}

/// What one successful cycle installed.
#[derive(Debug, Clone, Default)]
pub struct ReloadOutcome {
    pub routes: usize,
    /// Modules left out of the table.
    pub skipped: Vec<RouteSynthesisError>,
    /// Projects whose schema failed to compile and now validate nothing.
    pub degraded_schemas: Vec<String>,
}

/// Running summary, published after every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    pub state: ReloadState,
    /// Cycles started, successful or not.
    pub cycles: u64,
    /// Tables installed.
    pub generation: u64,
    pub failures: u64,
    pub routes: usize,
    pub skipped: Vec<String>,
    pub degraded_schemas: Vec<String>,
    pub last_error: Option<String>,
}

impl Default for ReloadReport {
    fn default() -> Self {
        Self {
            state: ReloadState::Idle,
            cycles: 0,
            generation: 0,
            failures: 0,
            routes: 0,
            skipped: Vec::new(),
            degraded_schemas: Vec::new(),
            last_error: None,
        }
    }
}

/// Rebuilds the routing table from configuration and swaps it in.
pub struct ReloadOrchestrator {
    projects: Arc<dyn ProjectStore>,
    collections: Arc<dyn CollectionStore>,
    table: Arc<RouteTable>,
    state: AtomicU8,
    /// Serializes cycles so installs are totally ordered.
    cycle: tokio::sync::Mutex<()>,
    trigger_tx: mpsc::Sender<&'static str>,
    trigger_rx: Mutex<Option<mpsc::Receiver<&'static str>>>,
    report: watch::Sender<ReloadReport>,
}

impl ReloadOrchestrator {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        collections: Arc<dyn CollectionStore>,
        table: Arc<RouteTable>,
    ) -> Arc<Self> {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (report, _) = watch::channel(ReloadReport::default());
        Arc::new(Self {
            projects,
            collections,
            table,
            state: AtomicU8::new(ReloadState::Idle as u8),
            cycle: tokio::sync::Mutex::new(()),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            report,
        })
    }

    pub fn state(&self) -> ReloadState {
        ReloadState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Latest report.
    pub fn report(&self) -> ReloadReport {
        self.report.borrow().clone()
    }

    /// Observe reports as cycles complete.
    pub fn subscribe(&self) -> watch::Receiver<ReloadReport> {
        self.report.subscribe()
    }

    /// Ask for a reload.
    ///
    /// Returns `false` when the request was folded into one already pending.
    pub fn request_reload(&self, reason: &'static str) -> bool {
        match self.trigger_tx.try_send(reason) {
            Ok(()) => {
                tracing::debug!(reason, "Reload queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(reason, "Reload already pending, coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(reason, "Reload worker stopped, request dropped");
                false
            }
        }
    }

    /// Start the worker that drains reload requests.
    ///
    /// Only the first call starts a worker.
    pub fn spawn(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        let mut triggers = self
            .trigger_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let orchestrator = self.clone();

        Some(tokio::spawn(async move {
            tracing::info!("Reload worker started");
            loop {
                tokio::select! {
                    trigger = triggers.recv() => {
                        let Some(reason) = trigger else { break };
                        tracing::debug!(reason, "Reload triggered");
                        // Failures are reported and logged inside; the worker keeps going.
                        let _ = orchestrator.reload_now().await;
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Reload worker received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        }))
    }

    /// Run one reload cycle immediately, waiting for any cycle in flight.
    pub async fn reload_now(&self) -> Result<ReloadOutcome, ReloadError> {
        let _cycle = self.cycle.lock().await;
        let start = Instant::now();
        self.state.store(ReloadState::Reloading as u8, Ordering::SeqCst);
        self.report.send_modify(|r| {
            r.state = ReloadState::Reloading;
            r.cycles += 1;
        });

        let result = self.build_and_install().await;

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    routes = outcome.routes,
                    skipped = outcome.skipped.len(),
                    degraded_schemas = outcome.degraded_schemas.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Routing table installed"
                );
                metrics::record_reload("installed", outcome.routes, start);
                self.report.send_modify(|r| {
                    r.generation += 1;
                    r.routes = outcome.routes;
                    r.skipped = outcome.skipped.iter().map(|e| e.to_string()).collect();
                    r.degraded_schemas = outcome.degraded_schemas.clone();
                    r.last_error = None;
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Reload aborted, previous routing table remains active");
                metrics::record_reload("failed", 0, start);
                self.report.send_modify(|r| {
                    r.failures += 1;
                    r.last_error = Some(e.to_string());
                });
            }
        }

        self.state.store(ReloadState::Idle as u8, Ordering::SeqCst);
        self.report.send_modify(|r| r.state = ReloadState::Idle);
        result
    }

    async fn build_and_install(&self) -> Result<ReloadOutcome, ReloadError> {
        let ticket = self.table.begin_build();

        // 1. One consistent read of the configuration.
        let projects = self
            .projects
            .list_projects()
            .await
            .map_err(ReloadError::ConfigRead)?;

        // 2. One validator per project, shared by its modules.
        let mut validators: HashMap<&str, Validator> = HashMap::new();
        let mut outcome = ReloadOutcome::default();
        for project in &projects {
            if validators.contains_key(project.id.as_str()) {
                continue;
            }
            let schema = self
                .projects
                .get_schema(&project.id)
                .await
                .map_err(ReloadError::ConfigRead)?;
            let compiled = compile(&project.name, schema.as_ref());
            if compiled.fallback.is_some() {
                metrics::record_schema_fallback();
                outcome.degraded_schemas.push(project.name.clone());
            }
            validators.insert(project.id.as_str(), compiled.validator);
        }

        // 3 + 4. Synthesize every module; later duplicates win.
        let mut table = RoutingTable::new();
        for project in &projects {
            let validator = validators
                .get(project.id.as_str())
                .cloned()
                .unwrap_or_default();
            for module in &project.modules {
                match synthesize(project, module, &validator, self.collections.as_ref()).await {
                    Ok(entry) => {
                        if let Some(previous) = table.insert(entry) {
                            tracing::warn!(
                                path = %previous.path_key,
                                "Duplicate route, later definition wins"
                            );
                        }
                    }
                    // Backend outage: keep the previous table.
                    Err(RouteSynthesisError::Collection {
                        source: source @ StoreError::Unavailable(_),
                        ..
                    }) => return Err(ReloadError::ConfigRead(source)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping module");
                        outcome.skipped.push(e);
                    }
                }
            }
        }
        metrics::record_synthesis_failures(outcome.skipped.len());

        // 5. Swap.
        let installed = self.table.install(table, ticket);
        outcome.routes = installed.len();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        ChangeFeed, Collection, MemoryStore, ModuleDefinition, ProjectDefinition,
        SchemaDefinition, StoreResult,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    /// Delays every configuration read and counts them.
    struct SlowStore {
        inner: Arc<MemoryStore>,
        delay: Duration,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl ProjectStore for SlowStore {
        async fn list_projects(&self) -> StoreResult<Vec<ProjectDefinition>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.list_projects().await
        }

        async fn get_schema(&self, project_id: &str) -> StoreResult<Option<SchemaDefinition>> {
            self.inner.get_schema(project_id).await
        }

        async fn watch(&self) -> StoreResult<ChangeFeed> {
            self.inner.watch().await
        }
    }

    /// Collection handles that can be switched to fail like an unreachable backend.
    struct FlakyCollections {
        inner: Arc<MemoryStore>,
        down: AtomicBool,
    }

    #[async_trait]
    impl CollectionStore for FlakyCollections {
        async fn collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.collection(name).await
        }

        async fn drop_collection(&self, name: &str) -> StoreResult<bool> {
            self.inner.drop_collection(name).await
        }
    }

    fn orchestrator(store: &Arc<MemoryStore>) -> Arc<ReloadOrchestrator> {
        ReloadOrchestrator::new(store.clone(), store.clone(), Arc::new(RouteTable::new()))
    }

    fn keys(orchestrator: &ReloadOrchestrator) -> Vec<String> {
        orchestrator
            .table()
            .snapshot()
            .keys()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_reload_builds_table_from_configuration() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert_project(
                "shop",
                vec![
                    ModuleDefinition::new("orders", &["item"]),
                    ModuleDefinition::new("customers", &["name"]),
                ],
            )
            .unwrap();
        store
            .insert_project("blog", vec![ModuleDefinition::new("posts", &[])])
            .unwrap();

        let orchestrator = orchestrator(&store);
        let outcome = orchestrator.reload_now().await.unwrap();

        assert_eq!(outcome.routes, 3);
        assert_eq!(
            keys(&orchestrator),
            vec!["/shop/orders", "/shop/customers", "/blog/posts"]
        );
        assert_eq!(orchestrator.state(), ReloadState::Idle);
        assert_eq!(orchestrator.report().generation, 1);
    }

    #[tokio::test]
    async fn test_read_failure_keeps_previous_table() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert_project("shop", vec![ModuleDefinition::new("orders", &[])])
            .unwrap();
        let orchestrator = orchestrator(&store);
        orchestrator.reload_now().await.unwrap();
        let before = orchestrator.table().snapshot();

        store.set_available(false);
        let err = orchestrator.reload_now().await.unwrap_err();
        assert!(matches!(err, ReloadError::ConfigRead(StoreError::Unavailable(_))));

        assert!(Arc::ptr_eq(&before, &orchestrator.table().snapshot()));
        let report = orchestrator.report();
        assert_eq!(report.failures, 1);
        assert_eq!(report.generation, 1);
        assert!(report.last_error.is_some());
        assert_eq!(orchestrator.state(), ReloadState::Idle);
    }

    #[tokio::test]
    async fn test_collection_outage_keeps_previous_table() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert_project("shop", vec![ModuleDefinition::new("orders", &[])])
            .unwrap();
        let collections = Arc::new(FlakyCollections {
            inner: store.clone(),
            down: AtomicBool::new(false),
        });
        let orchestrator =
            ReloadOrchestrator::new(store.clone(), collections.clone(), Arc::new(RouteTable::new()));
        orchestrator.reload_now().await.unwrap();
        let before = orchestrator.table().snapshot();

        collections.down.store(true, Ordering::SeqCst);
        let err = orchestrator.reload_now().await.unwrap_err();
        assert!(matches!(err, ReloadError::ConfigRead(StoreError::Unavailable(_))));
        assert!(Arc::ptr_eq(&before, &orchestrator.table().snapshot()));
        assert_eq!(orchestrator.report().failures, 1);

        collections.down.store(false, Ordering::SeqCst);
        assert_eq!(orchestrator.reload_now().await.unwrap().routes, 1);
    }

    #[tokio::test]
    async fn test_bad_module_is_isolated() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert_project(
                "shop",
                vec![
                    ModuleDefinition::new("bad name", &[]),
                    ModuleDefinition::new("orders", &[]),
                ],
            )
            .unwrap();

        let orchestrator = orchestrator(&store);
        let outcome = orchestrator.reload_now().await.unwrap();
        assert_eq!(outcome.routes, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(keys(&orchestrator), vec!["/shop/orders"]);
    }

    #[tokio::test]
    async fn test_project_modules_share_validator() {
        let store = Arc::new(MemoryStore::default());
        let shop = store
            .insert_project(
                "shop",
                vec![
                    ModuleDefinition::new("orders", &[]),
                    ModuleDefinition::new("refunds", &[]),
                ],
            )
            .unwrap();
        store
            .set_schema(&shop.id, Some(SchemaDefinition(json!({"required": ["item"]}))))
            .unwrap();
        store
            .insert_project("blog", vec![ModuleDefinition::new("posts", &[])])
            .unwrap();

        let orchestrator = orchestrator(&store);
        orchestrator.reload_now().await.unwrap();
        let table = orchestrator.table().snapshot();

        for key in ["/shop/orders", "/shop/refunds"] {
            let validator = table.get(key).unwrap().handler.validator();
            assert!(!validator.validate(&json!({})).valid, "{} validates", key);
        }
        assert!(table.get("/blog/posts").unwrap().handler.validator().is_noop());
    }

    #[tokio::test]
    async fn test_malformed_schema_degrades() {
        let store = Arc::new(MemoryStore::default());
        let shop = store
            .insert_project("shop", vec![ModuleDefinition::new("orders", &[])])
            .unwrap();
        store
            .set_schema(&shop.id, Some(SchemaDefinition(json!({"type": 12}))))
            .unwrap();

        let orchestrator = orchestrator(&store);
        let outcome = orchestrator.reload_now().await.unwrap();
        assert_eq!(outcome.routes, 1);
        assert_eq!(outcome.degraded_schemas, vec!["shop"]);
        let table = orchestrator.table().snapshot();
        assert!(table.get("/shop/orders").unwrap().handler.validator().is_noop());
    }

    #[tokio::test]
    async fn test_duplicate_module_last_wins() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert_project(
                "shop",
                vec![
                    ModuleDefinition::new("orders", &["first"]),
                    ModuleDefinition::new("items", &[]),
                    ModuleDefinition::new("orders", &["second"]),
                ],
            )
            .unwrap();

        let orchestrator = orchestrator(&store);
        let outcome = orchestrator.reload_now().await.unwrap();
        assert_eq!(outcome.routes, 2);
        assert_eq!(keys(&orchestrator), vec!["/shop/items", "/shop/orders"]);
    }

    #[tokio::test]
    async fn test_burst_of_triggers_is_coalesced() {
        let memory = Arc::new(MemoryStore::default());
        let slow = Arc::new(SlowStore {
            inner: memory.clone(),
            delay: Duration::from_millis(150),
            reads: AtomicUsize::new(0),
        });
        let orchestrator =
            ReloadOrchestrator::new(slow.clone(), memory.clone(), Arc::new(RouteTable::new()));
        let (shutdown_tx, _) = broadcast::channel(1);
        orchestrator.spawn(shutdown_tx.subscribe()).unwrap();

        assert!(orchestrator.request_reload("test"));
        while slow.reads.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The first cycle is in flight: one trigger queues, the rest fold into it.
        let queued: Vec<bool> = (0..10).map(|_| orchestrator.request_reload("burst")).collect();
        assert!(queued[0]);
        assert!(queued[1..].iter().all(|q| !q));

        let mut reports = orchestrator.subscribe();
        reports.wait_for(|r| r.generation >= 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(slow.reads.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.report().cycles, 2);
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_coalesced_reload_sees_latest_configuration() {
        let memory = Arc::new(MemoryStore::default());
        let slow = Arc::new(SlowStore {
            inner: memory.clone(),
            delay: Duration::from_millis(100),
            reads: AtomicUsize::new(0),
        });
        let orchestrator =
            ReloadOrchestrator::new(slow.clone(), memory.clone(), Arc::new(RouteTable::new()));
        let (shutdown_tx, _) = broadcast::channel(1);
        orchestrator.spawn(shutdown_tx.subscribe()).unwrap();

        memory
            .insert_project("shop", vec![ModuleDefinition::new("a", &[])])
            .unwrap();
        orchestrator.request_reload("add a");
        memory
            .upsert_project(
                "shop",
                vec![ModuleDefinition::new("a", &[]), ModuleDefinition::new("b", &[])],
            )
            .unwrap();
        orchestrator.request_reload("add b");

        let mut reports = orchestrator.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            reports.wait_for(|r| r.routes == 2 && r.state == ReloadState::Idle),
        )
        .await
        .unwrap()
        .unwrap();

        let table = orchestrator.table().snapshot();
        assert!(table.contains("/shop/a"));
        assert!(table.contains("/shop/b"));
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_spawn_only_once() {
        let store = Arc::new(MemoryStore::default());
        let orchestrator = orchestrator(&store);
        let (shutdown_tx, _) = broadcast::channel(1);
        assert!(orchestrator.spawn(shutdown_tx.subscribe()).is_some());
        assert!(orchestrator.spawn(shutdown_tx.subscribe()).is_none());
        let _ = shutdown_tx.send(());
    }
}
