//! Range reader: serves `(offset, length)` reads across one file's chunks.

use std::sync::Arc;

use log::warn;

use crate::chunk::BLOCK_SIZE;
use crate::chunk::index::ChunkRef;
use crate::chunk::store::BlockStore;
use crate::error::RrwError;

struct BlockInfo {
    key: String,
    size: u64,
}

pub struct RangeReader {
    blocks: Vec<BlockInfo>,
    store: Arc<BlockStore>,
    prefetch: tokio::sync::Mutex<()>,
}

impl RangeReader {
    pub fn new(store: Arc<BlockStore>, chunks: &[ChunkRef]) -> Self {
        let blocks = chunks
            .iter()
            .map(|c| BlockInfo {
                key: c.hex_key(),
                size: c.size,
            })
            .collect();
        Self {
            blocks,
            store,
            prefetch: tokio::sync::Mutex::new(()),
        }
    }

    /// Assemble bytes left-to-right across the chunk sequence. Short reads
    /// at end of file are legal; the return value is the count produced.
    pub async fn range_read(
        &self,
        dest: &mut [u8],
        offset: u64,
        length: u64,
    ) -> Result<u64, RrwError> {
        if self.blocks.is_empty() {
            return Ok(0);
        }

        let mut read = 0u64;
        let mut block_idx = (offset / BLOCK_SIZE) as usize;
        let mut offset_in_block = offset % BLOCK_SIZE;

        while read < length && block_idx < self.blocks.len() {
            let block = &self.blocks[block_idx];
            let n = self
                .store
                .read_block(
                    &block.key,
                    block.size,
                    &mut dest[read as usize..],
                    offset_in_block,
                    length - read,
                )
                .await?;

            read += n;
            offset_in_block += n;
            if offset_in_block >= BLOCK_SIZE {
                block_idx += 1;
                offset_in_block = 0;
            } else if n == 0 {
                // A short final chunk: nothing further to produce.
                break;
            }
        }

        Ok(read)
    }

    /// Warm the local cache with every chunk of this file, ahead of demand.
    /// Concurrent invocations coalesce: whoever holds the try-lock does the
    /// work, everyone else is a no-op. Idempotent, so repeated calls leave
    /// the cache unchanged.
    pub async fn background_copy(&self) {
        let Ok(_guard) = self.prefetch.try_lock() else {
            return;
        };

        for block in &self.blocks {
            if let Err(e) = self.store.download_if_missing(&block.key).await {
                warn!("prefetch of block {} failed: {e}", block.key);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::BlobBackend;
    use crate::cadapter::localfs::LocalFsBackend;
    use sha2::{Digest, Sha256};

    /// Upload `data` as 4 KiB chunks and return the matching refs.
    async fn seed_chunks(backend: &LocalFsBackend, data: &[u8]) -> Vec<ChunkRef> {
        let mut chunks = Vec::new();
        for piece in data.chunks(BLOCK_SIZE as usize) {
            let key: [u8; 32] = Sha256::digest(piece).into();
            backend.put_blob(&hex::encode(key), piece).await.unwrap();
            chunks.push(ChunkRef {
                key,
                size: piece.len() as u64,
            });
        }
        chunks
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn reader_for(data: &[u8]) -> (Arc<RangeReader>, tempfile::TempDir, tempfile::TempDir) {
        let remote = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(remote.path());
        let chunks = seed_chunks(&backend, data).await;
        let cache = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(Arc::new(backend), cache.path()).unwrap());
        (
            Arc::new(RangeReader::new(store, &chunks)),
            remote,
            cache,
        )
    }

    #[tokio::test]
    async fn read_spanning_chunk_boundary() {
        // 5000 bytes: one full chunk plus a 904-byte tail.
        let data = pattern(5000);
        let (reader, _r, _c) = reader_for(&data).await;

        let mut dest = vec![0u8; 20];
        let n = reader.range_read(&mut dest, 4090, 20).await.unwrap();
        assert_eq!(n, 20);
        assert_eq!(dest, data[4090..4110]);
    }

    #[tokio::test]
    async fn read_past_end_is_short() {
        let data = pattern(5000);
        let (reader, _r, _c) = reader_for(&data).await;

        let mut dest = vec![0u8; 100];
        let n = reader.range_read(&mut dest, 4990, 100).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(&dest[..10], &data[4990..]);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_tail() {
        let data = pattern(8192);
        let (reader, _r, _c) = reader_for(&data).await;

        let mut dest = vec![0u8; 8192];
        let n = reader.range_read(&mut dest, 0, 8192).await.unwrap();
        assert_eq!(n, 8192);
        assert_eq!(dest, data);

        let n = reader.range_read(&mut dest, 8192, 10).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn background_copy_is_idempotent() {
        let data = pattern(10_000);
        let remote = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(remote.path());
        let chunks = seed_chunks(&backend, &data).await;
        let cache = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(Arc::new(backend), cache.path()).unwrap());
        let reader = RangeReader::new(store, &chunks);

        reader.background_copy().await;
        let count = std::fs::read_dir(cache.path()).unwrap().count();
        assert_eq!(count, 3);

        reader.background_copy().await;
        assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), count);

        // Reads served after the prefetch still return the right bytes.
        let mut dest = vec![0u8; data.len()];
        let n = reader.range_read(&mut dest, 0, data.len() as u64).await.unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(dest, data);
    }
}
