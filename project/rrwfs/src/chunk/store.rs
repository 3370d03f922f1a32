//! Content-addressed block cache fronting a remote blob source.
//!
//! Lookup order for a block read: process-wide LRU, then the on-disk cache
//! directory, then the remote backend. Remote fetches publish to the LRU
//! with a short TTL and persist to disk in the background via the
//! tmp-then-rename gate, so concurrent first touches of one key never
//! corrupt the cache file. Disk copies are never evicted by the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::warn;
use moka::Expiry;

use crate::cadapter::client::{BlobBackend, BlobError};
use crate::error::RrwError;
use crate::util::safe_write_file;

/// In-memory entries held per process (item count, not bytes).
const LRU_CAPACITY: u64 = 20_480;
/// TTL for blocks read back from the local cache directory.
const LOCAL_TTL: Duration = Duration::from_secs(300);
/// TTL for blocks freshly pulled from the remote source.
const REMOTE_TTL: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct CachedBlock {
    data: Bytes,
    ttl: Duration,
}

struct BlockExpiry;

impl Expiry<String, CachedBlock> for BlockExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedBlock,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct BlockStore {
    backend: Arc<dyn BlobBackend>,
    lru: moka::future::Cache<String, CachedBlock>,
    cache_dir: PathBuf,
}

impl BlockStore {
    pub fn new(backend: Arc<dyn BlobBackend>, cache_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            backend,
            lru: moka::future::Cache::builder()
                .max_capacity(LRU_CAPACITY)
                .expire_after(BlockExpiry)
                .build(),
            cache_dir,
        })
    }

    fn block_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }

    /// Copy up to `length` bytes of block `key` into `dest`, starting at
    /// `offset_in_block`. `block_size` is the block's logical size; copies
    /// are clamped to it. Returns the number of bytes copied.
    pub async fn read_block(
        &self,
        key: &str,
        block_size: u64,
        dest: &mut [u8],
        offset_in_block: u64,
        length: u64,
    ) -> Result<u64, RrwError> {
        let real_len = length.min(block_size.saturating_sub(offset_in_block));
        if real_len == 0 {
            return Ok(0);
        }

        let block = self.load_block(key).await?;
        if (block.len() as u64) < offset_in_block + real_len {
            return Err(RrwError::Remote(BlobError::Backend(format!(
                "block {key} holds {} bytes, expected at least {}",
                block.len(),
                offset_in_block + real_len
            ))));
        }

        let start = offset_in_block as usize;
        let end = start + real_len as usize;
        dest[..real_len as usize].copy_from_slice(&block[start..end]);
        Ok(real_len)
    }

    /// Pure prefetch: copy the block from the remote source into the cache
    /// directory when no local copy exists yet. Skips the LRU entirely.
    pub async fn download_if_missing(&self, key: &str) -> Result<(), RrwError> {
        let path = self.block_path(key);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        let buf = self.backend.get_blob(key).await?;
        safe_write_file(&buf, &path).await?;
        Ok(())
    }

    async fn load_block(&self, key: &str) -> Result<Bytes, RrwError> {
        if let Some(entry) = self.lru.get(key).await {
            return Ok(entry.data);
        }

        let path = self.block_path(key);
        match tokio::fs::read(&path).await {
            Ok(buf) => {
                let data = Bytes::from(buf);
                self.lru
                    .insert(
                        key.to_string(),
                        CachedBlock {
                            data: data.clone(),
                            ttl: LOCAL_TTL,
                        },
                    )
                    .await;
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let buf = self.backend.get_blob(key).await?;
                let data = Bytes::from(buf);
                self.lru
                    .insert(
                        key.to_string(),
                        CachedBlock {
                            data: data.clone(),
                            ttl: REMOTE_TTL,
                        },
                    )
                    .await;

                // Warm the disk cache off the read path.
                let persist = data.clone();
                tokio::spawn(async move {
                    if let Err(e) = safe_write_file(&persist, &path).await {
                        warn!("failed to persist block to cache: {e}");
                    }
                });

                Ok(data)
            }
            Err(e) => Err(e.into()),
        }
    }
}
