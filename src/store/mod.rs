//! Distributed configuration store access.
//!
//! # Data Flow
//! ```text
//! SyncController
//!     → ConfigStore::get_hash()  (cheap change detection)
//!     → ConfigStore::get_blob()  (only when the hash moved)
//! ```
//!
//! # Design Decisions
//! - Stateless accessor: no caching, no retries (the poll cadence retries)
//! - Cancellation is applied by the caller via `read_cancellable`

pub mod http;
pub mod memory;

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use http::HttpConfigStore;
pub use memory::MemoryConfigStore;

/// Errors surfaced by store reads.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Communication failure, timeout or unexpected response.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The read was abandoned because shutdown is in progress.
    #[error("store read cancelled")]
    Cancelled,
}

/// Read-only view of the configuration keys.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current configuration hash.
    async fn get_hash(&self) -> Result<String, StoreError>;

    /// Current configuration archive bytes.
    async fn get_blob(&self) -> Result<Vec<u8>, StoreError>;
}

/// Run a store read, giving up with [`StoreError::Cancelled`] once `cancel` fires.
pub async fn read_cancellable<T, F>(cancel: &CancellationToken, read: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        result = read => result,
    }
}
