//! Live reconfiguration subsystem.
//!
//! # Data Flow
//! ```text
//! Triggers:
//!     startup → reload_now() (blocking, before traffic)
//!     change feed event / (re)connect / lag → listener.rs → request_reload()
//!     admin POST /admin/reload, SIGHUP      → request_reload()
//!
//! orchestrator.rs (single worker, queue depth one):
//!     list_projects → compile schemas → synthesize routes → RouteTable::install
//!
//! Deleted event (listener.rs, immediate):
//!     RouteTable::remove_entry for every prior module
//!     → drop_collection (best effort)
//!     → request_reload()
//! ```
//!
//! # Design Decisions
//! - At most one cycle runs at a time; bursts collapse into one follow-up cycle
//! - A failed configuration read keeps the previous table
//! - A module that fails to synthesize is skipped, never fatal to the cycle

pub mod listener;
pub mod orchestrator;

pub use listener::{ChangeListener, ReconnectPolicy};
pub use orchestrator::{ReloadError, ReloadOrchestrator, ReloadOutcome, ReloadReport, ReloadState};
