//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received or fatal error → cancel token → tasks drain → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP         → Resubscribe to the update bus
//! ```
//!
//! # Design Decisions
//! - One cancellation token is the single shutdown source; every task takes
//!   a clone or a child
//! - In-flight applies finish before the service returns

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
