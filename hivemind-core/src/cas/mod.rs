//! Content-addressed store client.
//!
//! The blob store itself is an external collaborator; this module only
//! defines the interface the protocol engine needs from it and a JSON
//! handle that applies CID normalization, canonical serialization and
//! I/O timeouts.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cid;
use crate::config::{CasBackend, CasConfig};
use crate::error::{HivemindError, Result};

/// Raw blob storage keyed by CID.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes, returning their CID. Storing the same bytes twice is a no-op.
    async fn put(&self, data: Vec<u8>) -> Result<String>;

    /// Fetch the bytes stored under a (bare) CID.
    async fn get(&self, cid: &str) -> Result<Vec<u8>>;

    /// Check whether a CID is present.
    async fn contains(&self, cid: &str) -> bool;
}

/// Shared JSON handle over a [`ContentStore`].
///
/// Cloning is cheap; all clones talk to the same store.
#[derive(Clone)]
pub struct Cas {
    store: Arc<dyn ContentStore>,
    timeout: Duration,
}

impl Cas {
    /// Default timeout applied to each put/get.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// In-memory store, used by tests and dry runs.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Build a handle from configuration.
    pub async fn from_config(config: &CasConfig) -> Result<Self> {
        let store: Arc<dyn ContentStore> = match config.backend {
            CasBackend::Memory => Arc::new(MemoryStore::new()),
            CasBackend::File => Arc::new(FileStore::new(&config.storage_dir).await?),
        };
        Ok(Self::new(store).with_timeout(Duration::from_millis(config.timeout_ms)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Serialize and store a JSON object, returning its CID.
    pub async fn put_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let data = serde_json::to_vec(value)?;
        let cid = self.with_deadline("put", self.store.put(data)).await?;
        debug!(cid = %cid, "Stored JSON object");
        Ok(cid)
    }

    /// Fetch and deserialize the JSON object at `cid`.
    pub async fn get_json<T: DeserializeOwned>(&self, cid: &str) -> Result<T> {
        let cid = cid::normalize(cid);
        let data = self.with_deadline(&cid, self.store.get(&cid)).await?;
        serde_json::from_slice(&data).map_err(|e| HivemindError::CasDecodeError {
            cid: cid.clone(),
            reason: e.to_string(),
        })
    }

    pub async fn contains(&self, cid: &str) -> bool {
        self.store.contains(&cid::normalize(cid)).await
    }

    async fn with_deadline<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(HivemindError::CasTimeout(format!(
                "{} after {}ms",
                what,
                self.timeout.as_millis()
            ))),
        }
    }
}
