//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every request span (`x-request-id`)
//! - Reload cycles and change events are logged with path keys, never payloads
//! - Metrics are cheap (atomic increments) and optional

pub mod logging;
pub mod metrics;
