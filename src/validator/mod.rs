//! Configuration validation through the engine's own check mode.
//!
//! # Responsibilities
//! - Compile a staged program with `<engine> -C -f <file>` without touching
//!   the running instance
//! - Report pass/fail together with the engine's diagnostic text
//!
//! # Design Decisions
//! - The checker ships with the same binary that will run the program, so a
//!   passing check means the engine will accept it
//! - Runner failures (missing binary, timeout) count as a failed check

use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::process::{CommandRunner, CommandSpec};

/// Result of a configuration check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    pub diagnostics: String,
}

impl Validation {
    pub fn passed(diagnostics: impl Into<String>) -> Self {
        Self { ok: true, diagnostics: diagnostics.into() }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self { ok: false, diagnostics: diagnostics.into() }
    }
}

/// Runs the engine in check mode.
#[derive(Clone)]
pub struct ConfigValidator {
    runner: Arc<dyn CommandRunner>,
    engine: EngineConfig,
}

impl ConfigValidator {
    pub fn new(runner: Arc<dyn CommandRunner>, engine: EngineConfig) -> Self {
        Self { runner, engine }
    }

    /// Check the program file at `program_path`.
    pub async fn validate(&self, program_path: &Path) -> Validation {
        if !program_path.is_file() {
            return Validation::failed(format!(
                "configuration program {} does not exist",
                program_path.display()
            ));
        }

        let spec = CommandSpec::new(
            &self.engine.daemon,
            [
                "-C".to_string(),
                "-f".to_string(),
                program_path.display().to_string(),
                "-n".to_string(),
                self.engine.work_dir.display().to_string(),
            ],
            self.engine.command_timeout(),
        );

        match self.runner.run(&spec).await {
            Ok(output) if output.success() => Validation::passed(output.all_text()),
            Ok(output) => Validation::failed(output.all_text()),
            Err(e) => Validation::failed(e.to_string()),
        }
    }
}
