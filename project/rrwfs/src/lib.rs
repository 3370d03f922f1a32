//! RRW: remote lazy checkpoint storage on a user-space filesystem.
//!
//! The engine splits a source tar archive into a metadata tar (directory
//! structure plus per-file chunk maps) and a pool of 4 KiB content-addressed
//! blocks on a remote blob source, then mounts the metadata tar as a
//! read-only FUSE tree where file reads fetch only the blocks they touch.
//!
//! Modules:
//! - `chunk`: splitter, chunk index codec, block store and range reader.
//! - `cadapter`: blob source backends (local directory, OCI registry).
//! - `fuse`: inode tree builder, FUSE adapter and mount/unmount helpers.

pub mod cadapter;
pub mod chunk;
pub mod error;
pub mod fuse;
pub mod util;

pub use chunk::{BLOCK_SIZE, FileIndex, split_tar};
pub use error::RrwError;
pub use fuse::mount::{MountSession, mount_rrw};
