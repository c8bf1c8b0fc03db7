//! Long-running driver around a [`SyncController`].
//!
//! # Responsibilities
//! - Initial reconciliation at startup
//! - Periodic reconciliation (and engine recovery) on a timer
//! - Reconciliation on bus announcements and admin requests
//! - Periodic warning while a sync error is unresolved
//! - Purge of the configuration directories on exit
//!
//! # Design Decisions
//! - Every trigger funnels through this task, so a fatal error from any of
//!   them ends the service with the same exit path

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bus::UpdateNotification;
use crate::config::ControllerConfig;
use crate::controller::{FatalError, ReconcileOutcome, SyncController};

type TriggerReply = oneshot::Sender<Result<ReconcileOutcome, String>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("sync service is not running")]
    ServiceStopped,

    #[error("{0}")]
    Fatal(String),
}

/// Requests a reconciliation from the running service.
#[derive(Clone)]
pub struct ReconcileTrigger {
    tx: mpsc::Sender<TriggerReply>,
}

impl ReconcileTrigger {
    pub async fn request(&self) -> Result<ReconcileOutcome, TriggerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(reply_tx)
            .await
            .map_err(|_| TriggerError::ServiceStopped)?;
        match reply_rx.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(fatal)) => Err(TriggerError::Fatal(fatal)),
            Err(_) => Err(TriggerError::ServiceStopped),
        }
    }
}

pub struct SyncService {
    controller: Arc<SyncController>,
    poll_interval: Duration,
    error_report_interval: Duration,
    retain_artifacts: bool,
    notifications: mpsc::Receiver<UpdateNotification>,
    triggers: mpsc::Receiver<TriggerReply>,
}

impl SyncService {
    pub fn new(
        controller: Arc<SyncController>,
        config: &ControllerConfig,
        notifications: mpsc::Receiver<UpdateNotification>,
    ) -> (Self, ReconcileTrigger) {
        let (tx, triggers) = mpsc::channel(8);
        let service = Self {
            controller,
            poll_interval: config.poll_interval(),
            error_report_interval: config.error_report_interval(),
            retain_artifacts: config.retain_artifacts,
            notifications,
            triggers,
        };
        (service, ReconcileTrigger { tx })
    }

    /// Run until `cancel` fires or a fatal error occurs.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), FatalError> {
        let SyncService {
            controller,
            poll_interval,
            error_report_interval,
            retain_artifacts,
            mut notifications,
            mut triggers,
        } = self;

        tracing::info!(
            role = %controller.role(),
            poll_interval_secs = poll_interval.as_secs(),
            "Sync service starting"
        );

        let reporter_cancel = cancel.child_token();
        let reporter = tokio::spawn(report_errors(
            controller.clone(),
            error_report_interval,
            reporter_cancel.clone(),
        ));

        let result = match controller.reconcile().await {
            Ok(outcome) => {
                tracing::info!(outcome = outcome.as_str(), "Initial reconciliation finished");
                drive(&controller, poll_interval, &mut notifications, &mut triggers, &cancel).await
            }
            Err(fatal) => Err(fatal),
        };

        if let Err(fatal) = &result {
            tracing::error!(error = %fatal, "Fatal sync error, stopping");
        }

        reporter_cancel.cancel();
        if let Err(e) = reporter.await {
            tracing::error!(error = %e, "Error reporter task failed");
        }

        if retain_artifacts {
            tracing::info!("Keeping configuration directories for inspection");
        } else {
            let staging = controller.staging().clone();
            match tokio::task::spawn_blocking(move || staging.purge()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to purge configuration directories"),
                Err(e) => tracing::warn!(error = %e, "Purge task failed"),
            }
        }

        tracing::info!("Sync service stopped");
        result
    }
}

async fn drive(
    controller: &SyncController,
    poll_interval: Duration,
    notifications: &mut mpsc::Receiver<UpdateNotification>,
    triggers: &mut mpsc::Receiver<TriggerReply>,
    cancel: &CancellationToken,
) -> Result<(), FatalError> {
    let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut bus_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Sync service received shutdown signal, exiting loop");
                return Ok(());
            }
            _ = ticker.tick() => {
                if controller.recover_engine().await {
                    tracing::info!("Engine restarted");
                }
                controller.reconcile().await?;
            }
            notification = notifications.recv(), if bus_open => match notification {
                Some(notification) => {
                    controller.on_notification(notification).await?;
                }
                None => {
                    tracing::warn!("Notification queue closed, continuing on the timer only");
                    bus_open = false;
                }
            },
            Some(reply) = triggers.recv() => {
                tracing::info!("Reconciliation requested");
                match controller.reconcile().await {
                    Ok(outcome) => {
                        let _ = reply.send(Ok(outcome));
                    }
                    Err(fatal) => {
                        let _ = reply.send(Err(fatal.to_string()));
                        return Err(fatal);
                    }
                }
            }
        }
    }
}

async fn report_errors(
    controller: Arc<SyncController>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let status = controller.status();
                if let Some(since) = status.last_error_at {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(since);
                    tracing::warn!(
                        since,
                        unresolved_secs = now.saturating_sub(since),
                        deployed = status.deployed_hash.as_deref().unwrap_or("none"),
                        "Configuration sync has an unresolved error"
                    );
                }
            }
        }
    }
}
