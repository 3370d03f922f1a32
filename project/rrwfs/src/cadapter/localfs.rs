//! Directory-backed blob store: one file per key under a flat root.
//!
//! Used for shared NFS-style block pools and as the test backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::cadapter::client::{BlobBackend, BlobError};
use crate::util::safe_write_file;

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobBackend for LocalFsBackend {
    async fn put_blob(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        // Content-addressed: an existing file already holds these bytes.
        safe_write_file(data, &self.path_for(key)).await?;
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
