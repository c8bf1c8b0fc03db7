//! Reconciliation results.

use serde::Serialize;
use thiserror::Error;

use crate::process::EngineError;

/// How a reconciliation ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The published hash equals the deployed one.
    NoChange,
    /// A new configuration is live.
    Applied,
    /// A store read was interrupted by shutdown.
    Cancelled,
    /// The store could not be read; nothing changed.
    Transient,
    /// The new configuration was rejected and the running one kept serving.
    FailSafe,
    /// The configuration was valid but could not be put into service.
    ApplyFailed,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::NoChange => "no_change",
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Cancelled => "cancelled",
            ReconcileOutcome::Transient => "transient",
            ReconcileOutcome::FailSafe => "fail_safe",
            ReconcileOutcome::ApplyFailed => "apply_failed",
        }
    }
}

/// Conditions under which the host is left without a working proxy.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("configuration {hash} is invalid and no engine instance is running: {diagnostics}")]
    InvalidBootstrap { hash: String, diagnostics: String },

    #[error("engine failed to start with configuration {hash}: {source}")]
    StartFailed {
        hash: String,
        #[source]
        source: EngineError,
    },
}
