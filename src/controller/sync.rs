//! Reconciliation of published configuration against the running engine.
//!
//! # State Machine
//! ```text
//! Idle → CheckingHash ─unchanged─▶ Idle
//!             │
//!             ▼
//!          Fetching → Staging → Validating ─invalid─▶ FailSafeDecision
//!                                    │                 ├─ engine running or
//!                                    │                 │  deployed before ──▶ Idle
//!                                    ▼                 └─ neither ──────────▶ Fatal
//!                                 Applying → Committed → Idle
//! ```
//!
//! # Design Decisions
//! - One async lock serializes every trigger; a trigger that waited finds the
//!   hash already deployed and returns `NoChange`
//! - `deployed_hash` only moves after the engine accepted the program
//! - Only store reads observe cancellation; once promotion starts the attempt
//!   runs to completion

use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::bus::UpdateNotification;
use crate::config::{EngineConfig, InstanceRole, SyncConfig};
use crate::controller::state::{ControllerStatus, DeploymentState};
use crate::controller::{FatalError, ReconcileOutcome};
use crate::observability::metrics;
use crate::process::{CommandRunner, EngineError, ProcessRegistry, ProcessTable};
use crate::staging::{ArtifactStaging, StagedConfig, StagingError};
use crate::store::{read_cancellable, ConfigStore, StoreError};
use crate::validator::ConfigValidator;

/// Name the engine gives the program it was started with.
const BOOT_PROGRAM: &str = "boot";

pub struct SyncController {
    role: InstanceRole,
    restart_on_crash: bool,
    engine: EngineConfig,
    store: Arc<dyn ConfigStore>,
    staging: ArtifactStaging,
    validator: ConfigValidator,
    registry: ProcessRegistry,
    state: Mutex<DeploymentState>,
    status: ArcSwap<ControllerStatus>,
    cancel: CancellationToken,
}

impl SyncController {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn ConfigStore>,
        table: Arc<dyn ProcessTable>,
        runner: Arc<dyn CommandRunner>,
        cancel: CancellationToken,
    ) -> Self {
        let role = config.controller.role;
        Self {
            role,
            restart_on_crash: config.controller.restart_on_crash,
            engine: config.engine.clone(),
            store,
            staging: ArtifactStaging::new(&config.staging),
            validator: ConfigValidator::new(runner.clone(), config.engine.clone()),
            registry: ProcessRegistry::new(table, runner, config.engine.clone()),
            state: Mutex::new(DeploymentState::default()),
            status: ArcSwap::from_pointee(ControllerStatus::initial(role)),
            cancel,
        }
    }

    pub fn role(&self) -> InstanceRole {
        self.role
    }

    /// Latest published snapshot. Never blocks on a running reconciliation.
    pub fn status(&self) -> Arc<ControllerStatus> {
        self.status.load_full()
    }

    pub fn staging(&self) -> &ArtifactStaging {
        &self.staging
    }

    /// Handle a bus announcement. Announcements for the other role are
    /// dropped without touching the store and yield `None`.
    pub async fn on_notification(
        &self,
        notification: UpdateNotification,
    ) -> Result<Option<ReconcileOutcome>, FatalError> {
        let accepted = notification.applies_to(self.role);
        metrics::record_notification(accepted);
        if !accepted {
            tracing::debug!(role = %self.role, ?notification, "Ignoring announcement for other role");
            return Ok(None);
        }

        tracing::info!(role = %self.role, "Update announced");
        self.reconcile().await.map(Some)
    }

    /// Bring the engine in line with the published configuration.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, FatalError> {
        let reconcile_id = Uuid::new_v4();
        let span = tracing::info_span!("reconcile", %reconcile_id, role = %self.role);
        let started = Instant::now();

        let result = async {
            let mut state = self.state.lock().await;
            let result = self.drive(&mut state).await;
            self.publish_status(&state, result.as_ref().ok().copied());
            result
        }
        .instrument(span)
        .await;

        match &result {
            Ok(outcome) => metrics::record_reconcile(outcome.as_str(), started),
            Err(_) => metrics::record_reconcile("fatal", started),
        }
        result
    }

    /// Restart the engine from the active directory if it died after a
    /// successful deploy. Returns true when an engine was started.
    pub async fn recover_engine(&self) -> bool {
        if !self.restart_on_crash {
            return false;
        }

        let mut state = self.state.lock().await;
        if !state.first_deploy_succeeded {
            return false;
        }

        match self.registry.is_running() {
            Ok(true) => return false,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Could not inspect engine processes");
                return false;
            }
        }

        let program = self.staging.active_program();
        tracing::warn!(program = ?program, "Engine is not running, restarting last applied configuration");

        let restarted = match self.start_engine(&program).await {
            Ok(()) => {
                state.active_program = Some(BOOT_PROGRAM.to_string());
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Engine restart failed");
                self.note_error(&mut state);
                false
            }
        };

        let last = self.status.load().last_outcome;
        self.publish_status(&state, last);
        restarted
    }

    async fn drive(&self, state: &mut DeploymentState) -> Result<ReconcileOutcome, FatalError> {
        let hash = match read_cancellable(&self.cancel, self.store.get_hash()).await {
            Ok(hash) => hash,
            Err(StoreError::Cancelled) => {
                tracing::debug!("Hash read cancelled");
                return Ok(ReconcileOutcome::Cancelled);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read configuration hash");
                return Ok(ReconcileOutcome::Transient);
            }
        };

        if state.deployed_hash.as_deref() == Some(hash.as_str()) {
            tracing::debug!(hash = %hash, "Configuration unchanged");
            return Ok(ReconcileOutcome::NoChange);
        }

        tracing::info!(
            hash = %hash,
            deployed = state.deployed_hash.as_deref().unwrap_or("none"),
            "Configuration changed"
        );

        let blob = match read_cancellable(&self.cancel, self.store.get_blob()).await {
            Ok(blob) => blob,
            Err(StoreError::Cancelled) => {
                tracing::debug!("Archive read cancelled");
                return Ok(ReconcileOutcome::Cancelled);
            }
            Err(StoreError::NotFound(key)) => {
                return self.reject(state, hash, format!("configuration archive {} is missing", key));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read configuration archive");
                return Ok(ReconcileOutcome::Transient);
            }
        };

        let staged = match self.stage(blob).await {
            Ok(staged) => staged,
            Err(e) if e.is_content_error() => return self.reject(state, hash, e.to_string()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to stage configuration");
                self.note_error(state);
                return Ok(ReconcileOutcome::ApplyFailed);
            }
        };

        let validation = self.validator.validate(&staged.program_path).await;
        if !validation.ok {
            return self.reject(state, hash, validation.diagnostics);
        }
        tracing::info!(files = staged.files, stubbed = staged.stubbed, "Configuration passed validation");

        self.apply(state, hash, staged).await
    }

    async fn stage(&self, blob: Vec<u8>) -> Result<StagedConfig, StagingError> {
        let staging = self.staging.clone();
        match tokio::task::spawn_blocking(move || staging.stage(&blob)).await {
            Ok(result) => result,
            Err(e) => Err(StagingError::io(self.staging.staging_dir(), std::io::Error::other(e))),
        }
    }

    /// Invalid configuration: keep serving the old one if there is an engine.
    fn reject(
        &self,
        state: &mut DeploymentState,
        hash: String,
        diagnostics: String,
    ) -> Result<ReconcileOutcome, FatalError> {
        tracing::error!(hash = %hash, diagnostics = %diagnostics, "Configuration failed validation");

        let running = match self.registry.is_running() {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(error = %e, "Could not inspect engine processes");
                true
            }
        };

        if running || state.first_deploy_succeeded {
            tracing::warn!(
                deployed = state.deployed_hash.as_deref().unwrap_or("none"),
                "Keeping the running configuration"
            );
            self.note_error(state);
            return Ok(ReconcileOutcome::FailSafe);
        }

        Err(FatalError::InvalidBootstrap { hash, diagnostics })
    }

    async fn apply(
        &self,
        state: &mut DeploymentState,
        hash: String,
        staged: StagedConfig,
    ) -> Result<ReconcileOutcome, FatalError> {
        state.generation += 1;
        let generation = state.generation;
        metrics::record_generation(generation);

        let staging = self.staging.clone();
        let staged_dir = staged.dir.clone();
        let promoted = tokio::task::spawn_blocking(move || staging.promote(&staged_dir))
            .await
            .map_err(|e| StagingError::io(&staged.dir, std::io::Error::other(e)))
            .and_then(|result| result);
        if let Err(e) = promoted {
            tracing::error!(error = %e, "Failed to promote configuration");
            self.note_error(state);
            return Ok(ReconcileOutcome::ApplyFailed);
        }

        let program = self.staging.active_program();
        let running = match self.registry.dedupe().and_then(|_| self.registry.is_running()) {
            Ok(running) => running,
            Err(e) => {
                tracing::error!(error = %e, "Could not inspect engine processes");
                self.note_error(state);
                return Ok(ReconcileOutcome::ApplyFailed);
            }
        };

        if running {
            let program_name = format!("{}_{}", self.engine.program_prefix, generation);
            match self
                .registry
                .hot_reload(&program, &self.engine.admin_address, &program_name)
                .await
            {
                Ok(()) => {
                    if let Some(previous) = state.active_program.take() {
                        self.discard_replaced(&previous, &program_name).await;
                    }
                    self.commit(state, hash, program_name)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Hot reload failed, previous program keeps serving");
                    self.note_error(state);
                    Ok(ReconcileOutcome::ApplyFailed)
                }
            }
        } else {
            match self.start_engine(&program).await {
                Ok(()) => self.commit(state, hash, BOOT_PROGRAM.to_string()),
                Err(source) if !state.first_deploy_succeeded => {
                    Err(FatalError::StartFailed { hash, source })
                }
                Err(e) => {
                    tracing::error!(error = %e, "Engine start failed");
                    self.note_error(state);
                    Ok(ReconcileOutcome::ApplyFailed)
                }
            }
        }
    }

    /// The engine keeps every loaded program until told otherwise. The
    /// program it was started with cannot be discarded.
    async fn discard_replaced(&self, previous: &str, current: &str) {
        if previous == BOOT_PROGRAM || previous == current {
            return;
        }
        if let Err(e) = self.registry.discard(&self.engine.admin_address, previous).await {
            tracing::warn!(program = %previous, error = %e, "Failed to discard replaced program");
        }
    }

    async fn start_engine(&self, program: &Path) -> Result<(), EngineError> {
        self.registry
            .start(
                program,
                &self.engine.admin_address,
                &self.engine.memory_limit,
                &self.engine.listen_address,
            )
            .await
            .map(|_| ())
    }

    fn commit(
        &self,
        state: &mut DeploymentState,
        hash: String,
        program: String,
    ) -> Result<ReconcileOutcome, FatalError> {
        tracing::info!(hash = %hash, program = %program, generation = state.generation, "Configuration applied");
        state.commit(hash, program);
        metrics::record_config_error(false);
        Ok(ReconcileOutcome::Applied)
    }

    fn note_error(&self, state: &mut DeploymentState) {
        state.record_error(SystemTime::now());
        metrics::record_config_error(true);
    }

    fn publish_status(&self, state: &DeploymentState, last_outcome: Option<ReconcileOutcome>) {
        self.status
            .store(Arc::new(ControllerStatus::capture(self.role, state, last_outcome)));
    }
}
