//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Synthesis (every reload cycle):
//!     ProjectDefinition + ModuleDefinition + project Validator
//!     → synthesizer.rs (collection "project_module", CRUD adapter)
//!     → RouteEntry keyed "/project/module"
//!     → RoutingTable (last write wins on duplicate keys)
//!     → table.rs atomic install
//!
//! Incoming Request ("/project/module[/id]")
//!     → RouteTable::snapshot()
//!     → RoutingTable::resolve(project, module)
//!     → RouteEntry or route-not-found
//! ```
//!
//! # Design Decisions
//! - Routing is an explicit, swappable map; the HTTP router is never mutated
//! - Tables are immutable once installed; reloads build a new one
//! - Exact match on both path segments, case-sensitive

pub mod synthesizer;
pub mod table;

pub use synthesizer::{synthesize, RouteSynthesisError};
pub use table::{BuildTicket, RouteEntry, RouteTable, RoutingTable};
