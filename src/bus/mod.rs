//! Update notification bus.
//!
//! # Data Flow
//! ```text
//! BootstrapWatcher ──watch──▶ NotificationSubscriber ──ws──▶ broadcast bus
//!                                     │
//!                                     ▼ mpsc
//!                              SyncController::on_notification
//! ```
//!
//! # Design Decisions
//! - Delivery is at-least-once and unordered; the controller dedupes by hash
//! - Bus settings live in a watch channel so a topology change resubscribes
//!   without restarting the controller

pub mod message;
pub mod subscriber;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::BusConfig;

pub use message::UpdateNotification;
pub use subscriber::{NotificationSubscriber, SubscriptionHandle};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus endpoint {0} cannot carry a channel path")]
    InvalidEndpoint(String),

    #[error("bus connection failed: {0}")]
    Connect(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("bus connection timed out")]
    ConnectTimeout,

    #[error("malformed notification: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Where to subscribe. Read from the bootstrap file or the `[bus]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSettings {
    pub url: Url,
    pub channel: String,
}

impl BusSettings {
    pub fn from_config(config: &BusConfig) -> Self {
        Self {
            url: config.url.clone(),
            channel: config.channel.clone(),
        }
    }

    /// `{url}/{channel}`
    pub fn endpoint(&self) -> Result<Url, BusError> {
        let mut endpoint = self.url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| BusError::InvalidEndpoint(self.url.to_string()))?
            .pop_if_empty()
            .push(&self.channel);
        Ok(endpoint)
    }
}
