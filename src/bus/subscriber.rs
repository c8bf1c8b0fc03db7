//! Long-lived bus subscription.
//!
//! # Responsibilities
//! - Keep one WebSocket session open to `{url}/{channel}`
//! - Forward decoded announcements into the controller's queue
//! - Reconnect with jittered backoff after a drop
//! - Tear down and reopen when the bootstrap settings change
//!
//! # Design Decisions
//! - Malformed frames are logged and skipped; they never end the session
//! - The handle owns a child cancellation token, so dropping it or cancelling
//!   the parent releases the connection

use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::bus::{BusError, BusSettings, UpdateNotification};
use crate::resilience::backoff::Backoff;
use crate::resilience::timeouts::with_deadline;

type BusStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    SinkClosed,
    Resubscribe,
    Disconnected,
}

/// Subscribes to update announcements.
pub struct NotificationSubscriber {
    settings: watch::Receiver<BusSettings>,
    backoff: Backoff,
}

impl NotificationSubscriber {
    pub fn new(settings: watch::Receiver<BusSettings>) -> Self {
        Self {
            settings,
            backoff: Backoff::new(DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS),
        }
    }

    /// Override the reconnect schedule.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff = Backoff::new(base_ms, max_ms);
        self
    }

    /// Open the subscription in a background task and forward every
    /// announcement into `sink`.
    pub fn subscribe(
        self,
        sink: mpsc::Sender<UpdateNotification>,
        parent: &CancellationToken,
    ) -> SubscriptionHandle {
        let cancel = parent.child_token();
        let resubscribe = Arc::new(Notify::new());

        let task = tokio::spawn(run(
            self.settings,
            self.backoff,
            sink,
            cancel.clone(),
            resubscribe.clone(),
        ));

        SubscriptionHandle {
            cancel,
            resubscribe,
            task: Some(task),
        }
    }
}

/// Owner of a running subscription. Dropping it closes the connection.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    resubscribe: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Close the current session and open a new one with the latest settings.
    ///
    /// A request made while a connection is being opened is satisfied by
    /// that connection.
    pub fn resubscribe(&self) {
        self.resubscribe.notify_one();
    }

    /// Close the subscription and wait for the background task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Bus subscription task failed");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut settings: watch::Receiver<BusSettings>,
    mut backoff: Backoff,
    sink: mpsc::Sender<UpdateNotification>,
    cancel: CancellationToken,
    resubscribe: Arc<Notify>,
) {
    loop {
        let current = settings.borrow_and_update().clone();

        match current.endpoint() {
            Ok(endpoint) => {
                let connected = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = connect(&endpoint) => result,
                };

                match connected {
                    Ok(stream) => {
                        backoff.reset();
                        // This session already uses the latest settings.
                        let _ = resubscribe.notified().now_or_never();
                        tracing::info!(endpoint = %endpoint, "Subscribed to update bus");

                        match pump(stream, &sink, &cancel, &mut settings, &resubscribe).await {
                            SessionEnd::Cancelled => break,
                            SessionEnd::SinkClosed => {
                                tracing::debug!("Notification queue closed, leaving bus");
                                break;
                            }
                            SessionEnd::Resubscribe => continue,
                            SessionEnd::Disconnected => {
                                tracing::warn!(endpoint = %endpoint, "Bus connection lost");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint, error = %e, "Bus subscription failed");
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Unusable bus settings, waiting for a change");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = settings_changed(&mut settings) => continue,
                }
            }
        }

        let delay = backoff.next_delay();
        tracing::debug!(attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "Reconnecting to bus");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = settings_changed(&mut settings) => {}
            _ = resubscribe.notified() => {}
        }
    }

    tracing::info!("Bus subscription closed");
}

async fn connect(endpoint: &Url) -> Result<BusStream, BusError> {
    let (stream, _response) = with_deadline(
        CONNECT_TIMEOUT,
        tokio_tungstenite::connect_async(endpoint.as_str()),
    )
    .await
    .map_err(|_| BusError::ConnectTimeout)?
    .map_err(|e| BusError::Connect(Box::new(e)))?;
    Ok(stream)
}

/// Forward frames until the session ends for any reason.
async fn pump(
    stream: BusStream,
    sink: &mpsc::Sender<UpdateNotification>,
    cancel: &CancellationToken,
    settings: &mut watch::Receiver<BusSettings>,
    resubscribe: &Notify,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            _ = settings_changed(settings) => {
                tracing::info!("Bus settings changed, resubscribing");
                break SessionEnd::Resubscribe;
            }
            _ = resubscribe.notified() => break SessionEnd::Resubscribe,
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match UpdateNotification::decode(text.as_str()) {
                    Ok(notification) => {
                        tracing::debug!(?notification, "Update announcement received");
                        if sink.send(notification).await.is_err() {
                            break SessionEnd::SinkClosed;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed bus frame"),
                },
                Some(Ok(Message::Close(_))) | None => break SessionEnd::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Bus read error");
                    break SessionEnd::Disconnected;
                }
            },
        }
    };

    if end != SessionEnd::Disconnected {
        let _ = write.send(Message::Close(None)).await;
    }
    end
}

/// Resolves on the next settings change. Never resolves once the sender is
/// gone, so a dropped watcher does not spin the reconnect loop.
async fn settings_changed(settings: &mut watch::Receiver<BusSettings>) {
    if settings.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
