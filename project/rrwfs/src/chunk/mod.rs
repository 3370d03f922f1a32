//! Chunking core: splitter, chunk index codec, block store, range reader.
//!
//! Regular files are cut into fixed 4 KiB blocks addressed by the SHA-256
//! of their bytes. The splitter turns a source tar into a metadata tar plus
//! uploads of every unique block; the block store serves those blocks back
//! through an in-memory LRU and an on-disk cache; the range reader maps a
//! `(offset, length)` request onto the ordered block sequence of one file.

pub mod index;
pub mod reader;
pub mod split;
pub mod store;

pub use index::{ChunkRef, FileIndex};
pub use reader::RangeReader;
pub use split::{SplitReport, split_tar};
pub use store::BlockStore;

/// Fixed chunk size; only a file's final chunk may be shorter.
pub const BLOCK_SIZE: u64 = 4096;

/// Tar type flag marking a small file stored inline in the metadata tar.
pub const SMALL_FILE_TYPE: u8 = b'o';
