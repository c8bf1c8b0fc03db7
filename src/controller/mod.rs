//! Configuration synchronization controller.
//!
//! # Data Flow
//! ```text
//! timer ────────────┐
//! bus announcement ─┼─▶ SyncController::reconcile()
//! admin trigger ────┘        │
//!                            ├─ store    (hash, then archive)
//!                            ├─ staging  (extract, promote)
//!                            ├─ validator
//!                            └─ process  (start or hot reload)
//! ```

pub mod outcome;
pub mod service;
pub mod state;
pub mod sync;

pub use outcome::{FatalError, ReconcileOutcome};
pub use service::{ReconcileTrigger, SyncService, TriggerError};
pub use state::{ControllerStatus, DeploymentState};
pub use sync::SyncController;
