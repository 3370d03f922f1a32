//! The immutable inode tree served by the mount.
//!
//! Nodes live in an arena indexed by inode number (root is 1); directory
//! entries and hard links reference nodes by index, so shared inodes alias
//! without ownership cycles and the tree frees once at teardown.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use rfuse3::{FileType, Timestamp};

use crate::chunk::reader::RangeReader;

/// Attributes captured from a metadata tar header.
#[derive(Debug, Clone)]
pub struct NodeAttr {
    pub kind: FileType,
    /// Permission and special bits, without the file-type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub rdev: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl NodeAttr {
    pub fn directory() -> Self {
        Self {
            kind: FileType::Directory,
            mode: 0o755,
            uid: 0,
            gid: 0,
            size: 0,
            nlink: 2,
            rdev: 0,
            atime: Timestamp::new(0, 0),
            mtime: Timestamp::new(0, 0),
            ctime: Timestamp::new(0, 0),
        }
    }
}

pub enum NodeKind {
    Directory {
        /// Child base name to inode number.
        children: BTreeMap<String, u64>,
    },
    Symlink {
        target: Bytes,
    },
    /// Whole body stored inline in the metadata tar.
    SmallFile {
        data: Bytes,
    },
    /// Body synthesized on demand from the chunk pool.
    ChunkedFile {
        reader: Arc<RangeReader>,
    },
    /// Fifo or device node; attributes only.
    Special,
}

pub struct Node {
    pub attr: NodeAttr,
    pub xattrs: HashMap<String, Vec<u8>>,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(attr: NodeAttr, kind: NodeKind) -> Self {
        Self {
            attr,
            xattrs: HashMap::new(),
            kind,
        }
    }

    pub fn directory() -> Self {
        Self::new(
            NodeAttr::directory(),
            NodeKind::Directory {
                children: BTreeMap::new(),
            },
        )
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn children(&self) -> Option<&BTreeMap<String, u64>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            _ => None,
        }
    }
}

/// The arena: `nodes[ino - 1]` is the node with inode number `ino`.
pub struct NodeTable {
    nodes: Vec<Node>,
}

impl NodeTable {
    /// A table holding only an empty root directory.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::directory()],
        }
    }

    pub const ROOT_INO: u64 = 1;

    pub fn get(&self, ino: u64) -> Option<&Node> {
        self.nodes.get(ino.checked_sub(1)? as usize)
    }

    pub fn get_mut(&mut self, ino: u64) -> Option<&mut Node> {
        self.nodes.get_mut(ino.checked_sub(1)? as usize)
    }

    /// Add a node to the arena and return its inode number.
    pub fn push(&mut self, node: Node) -> u64 {
        self.nodes.push(node);
        self.nodes.len() as u64
    }

    /// Attach `ino` under `parent` as `name`. An existing entry with the
    /// same name is replaced, matching tar extraction order semantics.
    pub fn attach(&mut self, parent: u64, name: &str, ino: u64) {
        if let Some(NodeKind::Directory { children }) =
            self.get_mut(parent).map(|n| &mut n.kind)
        {
            children.insert(name.to_string(), ino);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}
