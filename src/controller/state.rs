//! Deployment state owned by the controller.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::InstanceRole;
use crate::controller::ReconcileOutcome;

/// What is deployed. Only mutated while the controller lock is held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentState {
    /// `None` until a configuration has been applied.
    pub deployed_hash: Option<String>,
    pub first_deploy_succeeded: bool,
    /// Time of the first error since the last successful apply.
    pub last_error_at: Option<SystemTime>,
    /// Name of the engine program serving traffic.
    pub active_program: Option<String>,
    /// Apply attempts so far.
    pub generation: u64,
}

impl DeploymentState {
    /// Note an error. An already-open error window keeps its start time.
    pub fn record_error(&mut self, at: SystemTime) {
        if self.last_error_at.is_none() {
            self.last_error_at = Some(at);
        }
    }

    pub fn clear_error(&mut self) {
        self.last_error_at = None;
    }

    /// Record a successful apply of `hash`.
    pub fn commit(&mut self, hash: String, program: String) {
        self.deployed_hash = Some(hash);
        self.active_program = Some(program);
        self.first_deploy_succeeded = true;
        self.clear_error();
    }
}

/// Read-only snapshot for the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub role: InstanceRole,
    pub deployed_hash: Option<String>,
    pub first_deploy_succeeded: bool,
    /// Seconds since the Unix epoch.
    pub last_error_at: Option<u64>,
    pub active_program: Option<String>,
    pub generation: u64,
    pub last_outcome: Option<ReconcileOutcome>,
}

impl ControllerStatus {
    pub fn initial(role: InstanceRole) -> Self {
        Self::capture(role, &DeploymentState::default(), None)
    }

    pub fn capture(
        role: InstanceRole,
        state: &DeploymentState,
        last_outcome: Option<ReconcileOutcome>,
    ) -> Self {
        Self {
            role,
            deployed_hash: state.deployed_hash.clone(),
            first_deploy_succeeded: state.first_deploy_succeeded,
            last_error_at: state
                .last_error_at
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            active_program: state.active_program.clone(),
            generation: state.generation,
            last_outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_window_keeps_first_time() {
        let mut state = DeploymentState::default();
        let first = UNIX_EPOCH + Duration::from_secs(1_000);
        state.record_error(first);
        state.record_error(first + Duration::from_secs(300));
        assert_eq!(state.last_error_at, Some(first));

        state.commit("abc".to_string(), "main_1".to_string());
        assert_eq!(state.last_error_at, None);
        assert!(state.first_deploy_succeeded);
        assert_eq!(state.deployed_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_status_capture() {
        let mut state = DeploymentState::default();
        state.generation = 4;
        state.record_error(UNIX_EPOCH + Duration::from_secs(1_700_000_000));

        let status =
            ControllerStatus::capture(InstanceRole::Private, &state, Some(ReconcileOutcome::FailSafe));
        assert_eq!(status.last_error_at, Some(1_700_000_000));
        assert_eq!(status.generation, 4);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["role"], "private");
        assert_eq!(json["last_outcome"], "fail_safe");
        assert!(json["deployed_hash"].is_null());
    }
}
