//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Engine command / bus connect:
//!     → timeouts.rs (every external call has a deadline)
//! Bus subscription dropped:
//!     → backoff.rs (jittered exponential delay before reconnecting)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Store reads are never retried here; the poll cadence is the retry policy

pub mod backoff;
pub mod timeouts;
