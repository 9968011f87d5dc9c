//! In-memory content store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::ContentStore;
use crate::cid;
use crate::error::{HivemindError, Result};

/// Content store backed by a concurrent map. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put(&self, data: Vec<u8>) -> Result<String> {
        let cid = cid::compute(&data);
        self.blobs.entry(cid.clone()).or_insert(data);
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>> {
        self.blobs
            .get(cid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HivemindError::CasNotFound(cid.to_string()))
    }

    async fn contains(&self, cid: &str) -> bool {
        self.blobs.contains_key(cid)
    }
}
