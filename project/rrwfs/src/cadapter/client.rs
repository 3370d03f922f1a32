//! The backend trait every blob source implements.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transport or protocol failure reported by the backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// A content-addressed byte store. Keys are the hexadecimal SHA-256 of the
/// stored bytes, so `put_blob` must be idempotent: re-uploading an existing
/// key is a success, never a conflict.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn put_blob(&self, key: &str, data: &[u8]) -> Result<(), BlobError>;

    async fn get_blob(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Fetch `length` bytes starting at `offset`. The default goes through
    /// `get_blob`; backends with a cheaper ranged fetch override it.
    async fn get_blob_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, BlobError> {
        let blob = self.get_blob(key).await?;
        let start = (offset as usize).min(blob.len());
        let end = (offset.saturating_add(length) as usize).min(blob.len());
        Ok(blob[start..end].to_vec())
    }
}
