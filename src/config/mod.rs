//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, environment overrides)
//!     → validation.rs (semantic checks)
//!     → SyncConfig (validated, immutable)
//!     → shared by value/Arc with all subsystems
//!
//! Bus bootstrap file:
//!     watcher.rs detects change
//!     → load_bootstrap parses BusSettings
//!     → watch channel → NotificationSubscriber resubscribes
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only bus settings change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BusConfig, ControllerConfig, EngineConfig, InstanceRole, ObservabilityConfig,
    StagingConfig, StoreConfig, SyncConfig,
};
