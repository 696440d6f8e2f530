//! Change feed listener.
//!
//! # Responsibilities
//! - Keep a subscription to the projects change feed open
//! - Turn every configuration change into a reload request
//! - Tear down routes and collections of deleted projects immediately
//! - Reconnect with exponential backoff when the feed drops
//!
//! Every successful (re)connect also requests a reload: events published
//! while disconnected are lost, and a full rebuild makes up for them.

use futures_util::StreamExt;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::ReloadConfig;
use crate::observability::metrics;
use crate::reload::orchestrator::ReloadOrchestrator;
use crate::routing::RouteTable;
use crate::store::types::{collection_name, path_key};
use crate::store::{ChangeEvent, ChangeFeed, CollectionStore, ProjectStore, StoreError};

/// Exponential reconnect delay with jitter.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReloadConfig) -> Self {
        Self {
            base: Duration::from_millis(config.reconnect_base_delay_ms),
            max: Duration::from_millis(config.reconnect_max_delay_ms),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2u64.saturating_pow(attempt - 1))
            .min(max_ms);

        // Up to 10% jitter so many instances do not reconnect in lockstep.
        let jitter_range = delay_ms / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReloadConfig::default())
    }
}

/// Why a feed subscription ended.
enum FeedEnd {
    Disconnected,
    Failed(StoreError),
    Shutdown,
}

pub struct ChangeListener {
    projects: Arc<dyn ProjectStore>,
    collections: Arc<dyn CollectionStore>,
    table: Arc<RouteTable>,
    orchestrator: Arc<ReloadOrchestrator>,
    policy: ReconnectPolicy,
}

impl ChangeListener {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        collections: Arc<dyn CollectionStore>,
        orchestrator: Arc<ReloadOrchestrator>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            projects,
            collections,
            table: orchestrator.table().clone(),
            orchestrator,
            policy,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Change listener starting");
        let mut attempt: u32 = 0;

        loop {
            let subscribed = tokio::select! {
                result = self.projects.watch() => result,
                _ = shutdown.recv() => break,
            };

            match subscribed {
                Ok(feed) => {
                    attempt = 0;
                    tracing::info!("Change feed connected");
                    self.orchestrator.request_reload("feed connected");

                    match self.consume(feed, &mut shutdown).await {
                        FeedEnd::Shutdown => break,
                        FeedEnd::Disconnected => {
                            tracing::warn!("Change feed disconnected");
                        }
                        FeedEnd::Failed(e) => {
                            tracing::warn!(error = %e, "Change feed failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Change feed subscription failed");
                }
            }

            attempt = attempt.saturating_add(1);
            metrics::record_feed_reconnect();
            let delay = self.policy.delay_for(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to change feed");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Change listener received shutdown signal, exiting loop");
    }

    async fn consume(&self, mut feed: ChangeFeed, shutdown: &mut broadcast::Receiver<()>) -> FeedEnd {
        loop {
            let item = tokio::select! {
                item = feed.next() => item,
                _ = shutdown.recv() => return FeedEnd::Shutdown,
            };

            match item {
                Some(Ok(event)) => self.handle_event(event).await,
                Some(Err(StoreError::FeedLagged(missed))) => {
                    tracing::warn!(missed, "Change feed lagged, rebuilding from scratch");
                    self.orchestrator.request_reload("feed lagged");
                }
                Some(Err(e)) => return FeedEnd::Failed(e),
                None => return FeedEnd::Disconnected,
            }
        }
    }

    /// React to one configuration change.
    ///
    /// Deletions take effect before this returns; everything else waits for
    /// the requested reload.
    pub async fn handle_event(&self, event: ChangeEvent) {
        metrics::record_change_event(event.kind());

        match event {
            ChangeEvent::Inserted { current } => {
                tracing::info!(project = %current.name, "Project inserted");
            }
            ChangeEvent::Updated { current, .. } => {
                tracing::info!(project = %current.name, "Project updated");
            }
            ChangeEvent::Deleted {
                project_id,
                prior: Some(prior),
            } => {
                tracing::info!(project = %prior.name, project_id = %project_id, "Project deleted, tearing down routes");
                let live = self.recreated_modules(&prior.name).await;
                for key in prior.path_keys() {
                    if live.contains(&key) {
                        tracing::info!(path = %key, "Route belongs to a recreated project, kept");
                    } else if self.table.remove_entry(&key) {
                        tracing::info!(path = %key, "Route removed");
                    }
                }
                metrics::record_route_count(self.table.snapshot().len());

                for module in &prior.modules {
                    if live.contains(&path_key(&prior.name, &module.name)) {
                        continue;
                    }
                    let name = collection_name(&prior.name, &module.name);
                    match self.collections.drop_collection(&name).await {
                        Ok(true) => tracing::info!(collection = %name, "Collection dropped"),
                        Ok(false) => {
                            tracing::debug!(collection = %name, "Collection had no data")
                        }
                        Err(e) => {
                            metrics::record_teardown_failure();
                            tracing::warn!(collection = %name, error = %e, "Failed to drop collection");
                        }
                    }
                }
            }
            ChangeEvent::Deleted {
                project_id,
                prior: None,
            } => {
                tracing::warn!(project_id = %project_id, "Project deleted without prior image, reload only");
            }
        }

        self.orchestrator.request_reload("configuration changed");
    }

    /// Path keys of a project that was created again under the same name
    /// before its deletion reached us.
    ///
    /// An unreadable store counts as no recreation; the teardown proceeds.
    async fn recreated_modules(&self, project: &str) -> HashSet<String> {
        match self.projects.list_projects().await {
            Ok(projects) => projects
                .iter()
                .filter(|p| p.name == project)
                .flat_map(|p| p.path_keys())
                .collect(),
            Err(e) => {
                tracing::debug!(project, error = %e, "Could not check for recreated project");
                HashSet::new()
            }
        }
    }
}
