//! FUSE adapter: translates kernel requests into inode-tree operations.
//!
//! The tree is immutable once built, so every handler is a lock-free read;
//! entry and attribute TTLs are long for the same reason. The mount is
//! strictly read-only; write-side operations are left to the default
//! handlers and rejected by the kernel through the read-only mount option.

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use log::{debug, warn};
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyXAttr,
};
use rfuse3::raw::{Filesystem, Request};
use rfuse3::{Errno, FileType, Result as FuseResult};

use crate::fuse::node::{Node, NodeKind, NodeTable};

/// The tree never changes, so let the kernel cache aggressively.
const ATTR_TTL: Duration = Duration::from_secs(60 * 60);

/// Ask the kernel to keep page-cache contents across opens.
const FOPEN_KEEP_CACHE: u32 = 1 << 1;

/// Mount is read-only, so this only bounds requests the kernel never sends.
const MAX_WRITE: u32 = 128 * 1024;

pub struct RrwFs {
    table: NodeTable,
    prefetch_on_open: bool,
}

impl RrwFs {
    pub fn new(table: NodeTable) -> Self {
        Self {
            table,
            prefetch_on_open: false,
        }
    }

    /// Warm whole files into the local cache as soon as they are opened.
    pub fn with_prefetch_on_open(mut self) -> Self {
        self.prefetch_on_open = true;
        self
    }

    fn node(&self, ino: u64) -> FuseResult<&Node> {
        self.table.get(ino).ok_or_else(|| Errno::from(libc::ENOENT))
    }

    fn attr_of(&self, ino: u64, node: &Node) -> FileAttr {
        let attr = &node.attr;
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            #[cfg(target_os = "macos")]
            crtime: attr.ctime,
            kind: attr.kind,
            perm: attr.mode as u16,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: attr.rdev,
            #[cfg(target_os = "macos")]
            flags: 0,
            blksize: crate::chunk::BLOCK_SIZE as u32,
        }
    }
}

#[allow(refining_impl_trait_reachable)]
impl Filesystem for RrwFs {
    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        Ok(ReplyInit {
            max_write: NonZeroU32::new(MAX_WRITE).expect("MAX_WRITE is nonzero"),
        })
    }

    async fn destroy(&self, _req: Request) {}

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        debug!(
            "fuse.lookup parent={parent} name={}",
            name.to_string_lossy()
        );
        let parent_node = self.node(parent)?;
        let children = parent_node
            .children()
            .ok_or_else(|| Errno::from(libc::ENOTDIR))?;
        let &ino = children
            .get(name.to_string_lossy().as_ref())
            .ok_or_else(|| Errno::from(libc::ENOENT))?;
        let node = self.node(ino)?;
        Ok(ReplyEntry {
            ttl: ATTR_TTL,
            attr: self.attr_of(ino, node),
            generation: 0,
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let node = self.node(ino)?;
        Ok(ReplyAttr {
            ttl: ATTR_TTL,
            attr: self.attr_of(ino, node),
        })
    }

    async fn readlink(&self, _req: Request, ino: u64) -> FuseResult<ReplyData> {
        match &self.node(ino)?.kind {
            NodeKind::Symlink { target } => Ok(ReplyData {
                data: target.clone(),
            }),
            _ => Err(libc::EINVAL.into()),
        }
    }

    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        debug!("fuse.open ino={ino}");
        let node = self.node(ino)?;
        if node.is_dir() {
            return Err(libc::EISDIR.into());
        }
        if self.prefetch_on_open
            && let NodeKind::ChunkedFile { reader } = &node.kind
        {
            let reader = reader.clone();
            tokio::spawn(async move { reader.background_copy().await });
        }
        // Handles are stateless; the keep-cache hint lets repeat readers
        // hit the kernel page cache.
        Ok(ReplyOpen {
            fh: 0,
            flags: FOPEN_KEEP_CACHE,
        })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        debug!("fuse.read ino={ino} offset={offset} size={size}");
        let node = self.node(ino)?;
        let file_size = node.attr.size;
        if offset >= file_size {
            return Ok(ReplyData { data: Bytes::new() });
        }
        let length = (size as u64).min(file_size - offset);

        match &node.kind {
            NodeKind::SmallFile { data } => {
                let start = offset as usize;
                let end = start + length as usize;
                Ok(ReplyData {
                    data: data.slice(start..end),
                })
            }
            NodeKind::ChunkedFile { reader } => {
                let mut buf = vec![0u8; length as usize];
                let n = reader
                    .range_read(&mut buf, offset, length)
                    .await
                    .map_err(|e| {
                        warn!("read of ino {ino} failed: {e}");
                        Errno::from(libc::EREMOTEIO)
                    })?;
                buf.truncate(n as usize);
                Ok(ReplyData {
                    data: Bytes::from(buf),
                })
            }
            NodeKind::Symlink { target } => Ok(ReplyData {
                data: target.slice(offset as usize..(offset + length) as usize),
            }),
            _ => Err(libc::EINVAL.into()),
        }
    }

    type DirEntryStream<'a> = BoxStream<'a, FuseResult<DirectoryEntry>>;

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<BoxStream<'a, FuseResult<DirectoryEntry>>>> {
        debug!("fuse.readdir ino={ino} offset={offset}");
        let node = self.node(ino)?;
        let children = node.children().ok_or_else(|| Errno::from(libc::ENOTDIR))?;

        let mut all = vec![
            DirectoryEntry {
                inode: ino,
                kind: FileType::Directory,
                name: OsString::from("."),
                offset: 1,
            },
            DirectoryEntry {
                inode: ino,
                kind: FileType::Directory,
                name: OsString::from(".."),
                offset: 2,
            },
        ];
        for (i, (name, &child_ino)) in children.iter().enumerate() {
            let kind = self
                .table
                .get(child_ino)
                .map(|n| n.attr.kind)
                .unwrap_or(FileType::RegularFile);
            all.push(DirectoryEntry {
                inode: child_ino,
                kind,
                name: OsString::from(name),
                offset: (i + 3) as i64,
            });
        }

        let entries = all.into_iter().skip(offset.max(0) as usize).map(Ok);
        let boxed: BoxStream<'a, FuseResult<DirectoryEntry>> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectory { entries: boxed })
    }

    type DirEntryPlusStream<'a> = BoxStream<'a, FuseResult<DirectoryEntryPlus>>;

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<BoxStream<'a, FuseResult<DirectoryEntryPlus>>>> {
        debug!("fuse.readdirplus ino={ino} offset={offset}");
        let node = self.node(ino)?;
        let children = node.children().ok_or_else(|| Errno::from(libc::ENOTDIR))?;

        let mut all = vec![
            DirectoryEntryPlus {
                inode: ino,
                generation: 0,
                kind: FileType::Directory,
                name: OsString::from("."),
                offset: 1,
                attr: self.attr_of(ino, node),
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            },
            DirectoryEntryPlus {
                inode: ino,
                generation: 0,
                kind: FileType::Directory,
                name: OsString::from(".."),
                offset: 2,
                attr: self.attr_of(ino, node),
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            },
        ];
        for (i, (name, &child_ino)) in children.iter().enumerate() {
            let Some(child) = self.table.get(child_ino) else {
                continue;
            };
            all.push(DirectoryEntryPlus {
                inode: child_ino,
                generation: 0,
                kind: child.attr.kind,
                name: OsString::from(name),
                offset: (i + 3) as i64,
                attr: self.attr_of(child_ino, child),
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            });
        }

        let entries = all.into_iter().skip(offset as usize).map(Ok);
        let boxed: BoxStream<'a, FuseResult<DirectoryEntryPlus>> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn getxattr(
        &self,
        _req: Request,
        ino: u64,
        name: &OsStr,
        size: u32,
    ) -> FuseResult<ReplyXAttr> {
        let node = self.node(ino)?;
        let value = node
            .xattrs
            .get(name.to_string_lossy().as_ref())
            .ok_or_else(|| Errno::from(libc::ENODATA))?;
        if size == 0 {
            return Ok(ReplyXAttr::Size(value.len() as u32));
        }
        if (size as usize) < value.len() {
            return Err(libc::ERANGE.into());
        }
        Ok(ReplyXAttr::Data(Bytes::copy_from_slice(value)))
    }

    async fn listxattr(&self, _req: Request, ino: u64, size: u32) -> FuseResult<ReplyXAttr> {
        let node = self.node(ino)?;
        let total: usize = node.xattrs.keys().map(|k| k.len() + 1).sum();
        if size == 0 {
            return Ok(ReplyXAttr::Size(total as u32));
        }
        if (size as usize) < total {
            return Err(libc::ERANGE.into());
        }
        let mut data = Vec::with_capacity(total);
        for name in node.xattrs.keys() {
            data.extend_from_slice(name.as_bytes());
            data.push(0);
        }
        Ok(ReplyXAttr::Data(Bytes::from(data)))
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: self.table.len() as u64,
            ffree: 0,
            bsize: crate::chunk::BLOCK_SIZE as u32,
            namelen: 255,
            frsize: crate::chunk::BLOCK_SIZE as u32,
        })
    }

    async fn access(&self, _req: Request, ino: u64, _mask: u32) -> FuseResult<()> {
        self.node(ino)?;
        Ok(())
    }

    async fn forget(&self, _req: Request, _ino: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}
