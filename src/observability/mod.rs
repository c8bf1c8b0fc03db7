//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per reconciliation)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every reconciliation carries a `reconcile_id` through its log lines
//! - Metrics are cheap (atomic increments) and recorded whether or not an
//!   exporter is installed

pub mod logging;
pub mod metrics;
