//! The live routing table.
//!
//! # Responsibilities
//! - Hold the active `RoutingTable` behind a single atomic pointer
//! - Replace it wholesale on every reload
//! - Remove single entries ahead of a reload (module deletion)
//!
//! # Design Decisions
//! - Readers never lock: `snapshot()` is an `ArcSwap` load
//! - Writers (install, remove) are serialized by a small mutex
//! - A removed key stays removed for any table whose build began before
//!   the removal, so a stale reload cannot resurrect a dropped route

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::crud::CrudHandler;
use crate::store::types::path_key;

/// A bound route: path, storage collection, validator and handler.
///
/// Immutable once built; a reload supersedes it with a new entry.
#[derive(Debug)]
pub struct RouteEntry {
    pub path_key: String,
    pub project: String,
    pub module: String,
    pub handler: CrudHandler,
}

impl RouteEntry {
    pub fn collection_name(&self) -> &str {
        self.handler.collection_name()
    }
}

/// Immutable mapping from path key to route entry.
#[derive(Debug, Default, Clone)]
pub struct RoutingTable {
    entries: HashMap<String, Arc<RouteEntry>>,
    /// Keys in insertion order, for deterministic diagnostics.
    order: Vec<String>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. A later entry for the same key replaces the earlier one.
    pub fn insert(&mut self, entry: RouteEntry) -> Option<Arc<RouteEntry>> {
        let key = entry.path_key.clone();
        let previous = self.entries.insert(key.clone(), Arc::new(entry));
        if previous.is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push(key);
        previous
    }

    pub fn get(&self, path_key: &str) -> Option<&Arc<RouteEntry>> {
        self.entries.get(path_key)
    }

    /// Look up the entry serving `/project/module`.
    pub fn resolve(&self, project: &str, module: &str) -> Option<&Arc<RouteEntry>> {
        self.get(&path_key(project, module))
    }

    pub fn contains(&self, path_key: &str) -> bool {
        self.entries.contains_key(path_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<RouteEntry>> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    fn remove(&mut self, path_key: &str) -> bool {
        if self.entries.remove(path_key).is_some() {
            self.order.retain(|k| k != path_key);
            true
        } else {
            false
        }
    }
}

/// Marks the point a table build started, relative to entry removals.
#[derive(Debug, Clone, Copy)]
pub struct BuildTicket {
    removals_seen: u64,
}

#[derive(Debug, Default)]
struct Removals {
    seq: u64,
    tombstones: Vec<(u64, String)>,
}

/// Owner of the active routing table.
#[derive(Debug)]
pub struct RouteTable {
    active: ArcSwap<RoutingTable>,
    removals: Mutex<Removals>,
}

impl RouteTable {
    /// Start with an empty table.
    pub fn new() -> Self {
        Self {
            active: ArcSwap::from_pointee(RoutingTable::new()),
            removals: Mutex::new(Removals::default()),
        }
    }

    /// The table currently served. Never blocks.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.active.load_full()
    }

    /// Call before reading configuration for a new table.
    pub fn begin_build(&self) -> BuildTicket {
        let removals = self.removals.lock().unwrap_or_else(PoisonError::into_inner);
        BuildTicket {
            removals_seen: removals.seq,
        }
    }

    /// Replace the active table in one step.
    pub fn install_atomically(&self, table: RoutingTable) -> Arc<RoutingTable> {
        let ticket = self.begin_build();
        self.install(table, ticket)
    }

    /// Replace the active table with one built after `ticket` was taken.
    ///
    /// Entries removed after the ticket are filtered out first.
    pub fn install(&self, mut table: RoutingTable, ticket: BuildTicket) -> Arc<RoutingTable> {
        let mut removals = self.removals.lock().unwrap_or_else(PoisonError::into_inner);
        for (seq, key) in &removals.tombstones {
            if *seq > ticket.removals_seen && table.remove(key) {
                tracing::debug!(path = %key, "Dropping route removed during table build");
            }
        }
        removals
            .tombstones
            .retain(|(seq, _)| *seq > ticket.removals_seen);

        let table = Arc::new(table);
        self.active.store(table.clone());
        table
    }

    /// Remove one entry from the active table immediately.
    ///
    /// Returns whether the key was installed.
    pub fn remove_entry(&self, path_key: &str) -> bool {
        let mut removals = self.removals.lock().unwrap_or_else(PoisonError::into_inner);
        removals.seq += 1;
        let seq = removals.seq;
        removals.tombstones.push((seq, path_key.to_string()));

        let current = self.active.load_full();
        if !current.contains(path_key) {
            return false;
        }
        let mut next = RoutingTable::clone(&current);
        next.remove(path_key);
        self.active.store(Arc::new(next));
        true
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
