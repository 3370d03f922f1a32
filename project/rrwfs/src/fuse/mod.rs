//! FUSE surface: tree builder, request adapter, mount lifecycle.
//!
//! Submodules:
//! - `node`: the immutable inode arena shared by every handler.
//! - `build`: one-shot metadata tar parse at mount time.
//! - `adapter`: the rfuse3 `Filesystem` implementation.
//! - `mount`: session handling, unprivileged mount, lazy unmount fallback.

pub mod adapter;
pub mod build;
pub mod mount;
pub mod node;

pub use adapter::RrwFs;
pub use build::build_nodes;
pub use mount::{MountSession, mount_fs, mount_rrw};
pub use node::{Node, NodeAttr, NodeKind, NodeTable};
