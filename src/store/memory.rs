//! In-process configuration store.
//!
//! Used by tests and single-host setups where the archive is published
//! locally. Counts reads so callers can assert that a code path never touched
//! the store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{ConfigStore, StoreError};

#[derive(Debug, Default)]
struct Published {
    hash: Option<String>,
    blob: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    data: Arc<RwLock<Published>>,
    unavailable: Arc<AtomicBool>,
    hash_reads: Arc<AtomicUsize>,
    blob_reads: Arc<AtomicUsize>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a configuration: the hash and archive change together.
    pub async fn publish(&self, hash: &str, blob: Vec<u8>) {
        let mut data = self.data.write().await;
        data.hash = Some(hash.to_string());
        data.blob = Some(blob);
    }

    /// Simulate an outage; every read fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn hash_reads(&self) -> usize {
        self.hash_reads.load(Ordering::SeqCst)
    }

    pub fn blob_reads(&self) -> usize {
        self.blob_reads.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_hash(&self) -> Result<String, StoreError> {
        self.hash_reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let data = self.data.read().await;
        data.hash
            .clone()
            .ok_or_else(|| StoreError::NotFound("config/hash".to_string()))
    }

    async fn get_blob(&self) -> Result<Vec<u8>, StoreError> {
        self.blob_reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let data = self.data.read().await;
        data.blob
            .clone()
            .ok_or_else(|| StoreError::NotFound("config/blob".to_string()))
    }
}
