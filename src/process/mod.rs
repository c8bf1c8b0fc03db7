//! Proxy engine process management.
//!
//! # Data Flow
//! ```text
//! SyncController
//!     → registry.rs (list/dedupe, start, hot reload)
//!         → table.rs   (enumerate /proc, SIGKILL)
//!         → command.rs (engine and admin binaries, captured output + deadline)
//! ```
//!
//! # Design Decisions
//! - The engine is an external process; it is only driven through commands
//! - Both seams are traits so the controller can be exercised without an engine

pub mod command;
pub mod registry;
pub mod table;

pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use registry::{EngineError, ProcessRegistry};
pub use table::{ProcFsTable, ProcessHandle, ProcessTable};
