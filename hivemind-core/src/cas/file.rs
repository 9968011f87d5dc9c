//! Filesystem content store
//!
//! Stores blobs in a local directory tree keyed by CID. Reads re-hash the
//! content so a corrupted or tampered file never decodes as a valid object.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::ContentStore;
use crate::cid;
use crate::error::{HivemindError, Result};

/// Content store rooted at a directory.
pub struct FileStore {
    root_dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store at the given directory.
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(root_dir.join("blobs")).await?;

        info!(path = %root_dir.display(), "Initialized CAS file store");

        Ok(Self { root_dir })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Path of a blob. CIDs are spread over subdirectories by the four
    /// characters following the multibase prefix.
    fn blob_path(&self, cid: &str) -> PathBuf {
        let body = cid.get(1..).unwrap_or(cid);
        let subdir = &body[..4.min(body.len())];
        self.root_dir.join("blobs").join(subdir).join(cid)
    }

    fn check_cid(cid: &str) -> Result<()> {
        // Keep CIDs from escaping the store directory
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(HivemindError::CasNotFound(cid.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FileStore {
    async fn put(&self, data: Vec<u8>) -> Result<String> {
        let cid = cid::compute(&data);
        let path = self.blob_path(&cid);

        if fs::metadata(&path).await.is_ok() {
            debug!(cid = %cid, "Blob already exists");
            return Ok(cid);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never observe a partial blob
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;

        debug!(cid = %cid, size = data.len(), "Stored blob");
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>> {
        Self::check_cid(cid)?;
        let data = match fs::read(self.blob_path(cid)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HivemindError::CasNotFound(cid.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = cid::compute(&data);
        if actual != cid {
            return Err(HivemindError::CasDecodeError {
                cid: cid.to_string(),
                reason: format!("content hashes to {}", actual),
            });
        }

        Ok(data)
    }

    async fn contains(&self, cid: &str) -> bool {
        Self::check_cid(cid).is_ok() && fs::metadata(self.blob_path(cid)).await.is_ok()
    }
}
