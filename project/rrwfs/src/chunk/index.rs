//! Binary codec for the per-file chunk index stored in the metadata tar.
//!
//! Layout: 8-byte big-endian logical size, then one 40-byte record per
//! chunk (32-byte SHA-256 key followed by the 8-byte big-endian byte count
//! the reader should emit from that chunk).

use crate::error::RrwError;

const RECORD_LEN: usize = 40;

/// One chunk in place within a file: its content key and logical size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    pub key: [u8; 32],
    pub size: u64,
}

impl ChunkRef {
    pub fn hex_key(&self) -> String {
        hex::encode(self.key)
    }
}

/// The payload written for a chunked regular file: logical size plus the
/// ordered chunk sequence that reproduces it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileIndex {
    pub size: u64,
    pub chunks: Vec<ChunkRef>,
}

impl FileIndex {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.chunks.len() * RECORD_LEN);
        buf.extend_from_slice(&self.size.to_be_bytes());
        for chunk in &self.chunks {
            buf.extend_from_slice(&chunk.key);
            buf.extend_from_slice(&chunk.size.to_be_bytes());
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RrwError> {
        if data.len() < 8 || (data.len() - 8) % RECORD_LEN != 0 {
            return Err(RrwError::MalformedArchive(format!(
                "chunk index has invalid length {}",
                data.len()
            )));
        }

        let size = u64::from_be_bytes(data[..8].try_into().unwrap());
        let mut chunks = Vec::with_capacity((data.len() - 8) / RECORD_LEN);
        for record in data[8..].chunks_exact(RECORD_LEN) {
            let mut key = [0u8; 32];
            key.copy_from_slice(&record[..32]);
            let size = u64::from_be_bytes(record[32..].try_into().unwrap());
            chunks.push(ChunkRef { key, size });
        }

        Ok(Self { size, chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileIndex {
        FileIndex {
            size: 5000,
            chunks: vec![
                ChunkRef {
                    key: [0xab; 32],
                    size: 4096,
                },
                ChunkRef {
                    key: [0xcd; 32],
                    size: 904,
                },
            ],
        }
    }

    #[test]
    fn roundtrip_preserves_size_and_chunks() {
        let index = sample();
        let decoded = FileIndex::from_bytes(&index.to_bytes()).unwrap();
        assert_eq!(decoded, index);
        // Size law: the chunk sizes sum to the logical size.
        assert_eq!(
            decoded.chunks.iter().map(|c| c.size).sum::<u64>(),
            decoded.size
        );
    }

    #[test]
    fn encoding_layout_is_stable() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), 8 + 2 * 40);
        assert_eq!(&bytes[..8], &5000u64.to_be_bytes());
        assert_eq!(&bytes[8..40], &[0xab; 32]);
        assert_eq!(&bytes[40..48], &4096u64.to_be_bytes());
    }

    #[test]
    fn empty_chunk_list_roundtrips() {
        let index = FileIndex {
            size: 0,
            chunks: Vec::new(),
        };
        assert_eq!(FileIndex::from_bytes(&index.to_bytes()).unwrap(), index);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut bytes = sample().to_bytes();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            FileIndex::from_bytes(&bytes),
            Err(RrwError::MalformedArchive(_))
        ));
        assert!(matches!(
            FileIndex::from_bytes(&[0u8; 3]),
            Err(RrwError::MalformedArchive(_))
        ));
    }
}
