//! Configuration sync and safe-reload controller for edge proxy engines.

// Core
pub mod controller;
pub mod process;
pub mod staging;
pub mod store;
pub mod validator;

// Triggers
pub mod bus;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::SyncConfig;
pub use controller::{FatalError, ReconcileOutcome, SyncController, SyncService};
pub use lifecycle::Shutdown;
