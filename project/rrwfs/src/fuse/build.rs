//! Filesystem builder: one streaming pass over the metadata tar.
//!
//! The metadata tar cannot be seeked, so hard links are collected during
//! the pass and reconnected from an in-memory table afterwards. The tree
//! is fully constructed before the first read arrives; nothing here runs
//! after mount.

use std::collections::HashMap;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;

use bytes::Bytes;
use log::warn;
use rfuse3::{FileType, Timestamp};
use tar::{Archive, EntryType, Header};

use crate::chunk::SMALL_FILE_TYPE;
use crate::chunk::index::FileIndex;
use crate::chunk::reader::RangeReader;
use crate::chunk::store::BlockStore;
use crate::error::RrwError;
use crate::fuse::node::{Node, NodeAttr, NodeKind, NodeTable};

/// Parse a metadata tar into the inode tree, exactly once, at mount time.
pub fn build_nodes<R: Read>(meta: R, store: Arc<BlockStore>) -> Result<NodeTable, RrwError> {
    let mut archive = Archive::new(meta);
    let mut table = NodeTable::new();
    // Normalized entry path to inode, for hard-link resolution.
    let mut path_to_ino: HashMap<String, u64> = HashMap::new();
    // Hard links found during the pass: (link path, source path).
    let mut hard_links: Vec<(String, String)> = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| RrwError::MalformedArchive(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| RrwError::MalformedArchive(e.to_string()))?;
        let components = normalize(&entry.path()?.to_string_lossy());
        let pax = read_pax_records(&mut entry)?;
        let xattrs = xattrs_from_pax(&pax);

        let Some((base, dir)) = components.split_last() else {
            // The archive's own "." entry describes the root.
            if entry.header().entry_type() == EntryType::Directory {
                let attr = attr_from_header(entry.header(), FileType::Directory, &pax)?;
                let root = table.get_mut(NodeTable::ROOT_INO).unwrap();
                root.attr = NodeAttr {
                    size: 0,
                    nlink: 2,
                    ..attr
                };
                root.xattrs = xattrs;
            }
            continue;
        };
        let base = base.clone();
        let parent = ensure_dirs(&mut table, &mut path_to_ino, dir);
        let path = components.join("/");

        let flag = entry.header().entry_type().as_byte();
        if flag == SMALL_FILE_TYPE {
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            let mut attr =
                attr_from_header(entry.header(), FileType::RegularFile, &pax)?;
            attr.size = data.len() as u64;
            let mut node = Node::new(
                attr,
                NodeKind::SmallFile {
                    data: Bytes::from(data),
                },
            );
            node.xattrs = xattrs;
            let ino = table.push(node);
            table.attach(parent, &base, ino);
            path_to_ino.insert(path, ino);
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => {
                let mut payload = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut payload)?;
                let index = FileIndex::from_bytes(&payload)?;
                let reader = Arc::new(RangeReader::new(store.clone(), &index.chunks));
                let mut attr =
                    attr_from_header(entry.header(), FileType::RegularFile, &pax)?;
                attr.size = index.size;
                let mut node = Node::new(attr, NodeKind::ChunkedFile { reader });
                node.xattrs = xattrs;
                let ino = table.push(node);
                table.attach(parent, &base, ino);
                path_to_ino.insert(path, ino);
            }
            EntryType::Symlink => {
                let target = entry.link_name()?.ok_or_else(|| {
                    RrwError::MalformedArchive(format!("symlink {path} without target"))
                })?;
                let target = Bytes::copy_from_slice(target.as_os_str().as_bytes());
                let mut attr = attr_from_header(entry.header(), FileType::Symlink, &pax)?;
                attr.size = target.len() as u64;
                let mut node = Node::new(attr, NodeKind::Symlink { target });
                node.xattrs = xattrs;
                let ino = table.push(node);
                table.attach(parent, &base, ino);
                path_to_ino.insert(path, ino);
            }
            EntryType::Link => {
                let source = entry.link_name()?.ok_or_else(|| {
                    RrwError::MalformedArchive(format!("hard link {path} without source"))
                })?;
                hard_links.push((path, normalize(&source.to_string_lossy()).join("/")));
            }
            EntryType::Directory => {
                let attr = attr_from_header(entry.header(), FileType::Directory, &pax)?;
                let ino = upsert_dir(&mut table, &mut path_to_ino, parent, &base, &path);
                let node = table.get_mut(ino).unwrap();
                node.attr = NodeAttr {
                    size: 0,
                    nlink: 2,
                    ..attr
                };
                node.xattrs = xattrs;
            }
            kind @ (EntryType::Char | EntryType::Block | EntryType::Fifo) => {
                let file_type = match kind {
                    EntryType::Char => FileType::CharDevice,
                    EntryType::Block => FileType::BlockDevice,
                    _ => FileType::NamedPipe,
                };
                let mut attr = attr_from_header(entry.header(), file_type, &pax)?;
                let major = entry.header().device_major()?.unwrap_or(0);
                let minor = entry.header().device_minor()?.unwrap_or(0);
                attr.rdev = libc::makedev(major, minor) as u32;
                let mut node = Node::new(attr, NodeKind::Special);
                node.xattrs = xattrs;
                let ino = table.push(node);
                table.attach(parent, &base, ino);
                path_to_ino.insert(path, ino);
            }
            other => {
                warn!("entry {path}: unsupported type {:?}", other.as_byte() as char);
            }
        }
    }

    // Second pass over the deferred table: reconnect hard links so both
    // names reference the same inode.
    for (link_path, source_path) in hard_links {
        let Some(&source_ino) = path_to_ino.get(&source_path) else {
            warn!("hard link {link_path}: source {source_path} not in archive");
            continue;
        };
        let components = normalize(&link_path);
        let Some((base, dir)) = components.split_last() else {
            continue;
        };
        let parent = ensure_dirs(&mut table, &mut path_to_ino, dir);
        table.attach(parent, base, source_ino);
        if let Some(node) = table.get_mut(source_ino) {
            node.attr.nlink += 1;
        }
    }

    Ok(table)
}

/// Split a tar entry name into clean components.
fn normalize(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .map(str::to_string)
        .collect()
}

/// Walk `dir` from the root, materializing missing directories with
/// default attributes; later directory entries refresh them.
fn ensure_dirs(
    table: &mut NodeTable,
    path_to_ino: &mut HashMap<String, u64>,
    dir: &[String],
) -> u64 {
    let mut current = NodeTable::ROOT_INO;
    let mut walked = String::new();
    for comp in dir {
        if !walked.is_empty() {
            walked.push('/');
        }
        walked.push_str(comp);
        current = upsert_dir(table, path_to_ino, current, comp, &walked);
    }
    current
}

fn upsert_dir(
    table: &mut NodeTable,
    path_to_ino: &mut HashMap<String, u64>,
    parent: u64,
    name: &str,
    path: &str,
) -> u64 {
    if let Some(&ino) = table
        .get(parent)
        .and_then(Node::children)
        .and_then(|c| c.get(name))
    {
        return ino;
    }
    let ino = table.push(Node::directory());
    table.attach(parent, name, ino);
    path_to_ino.insert(path.to_string(), ino);
    ino
}

fn read_pax_records(
    entry: &mut tar::Entry<impl Read>,
) -> Result<Vec<(String, Vec<u8>)>, RrwError> {
    let mut records = Vec::new();
    if let Some(exts) = entry.pax_extensions()? {
        for ext in exts.flatten() {
            if let Ok(key) = ext.key() {
                records.push((key.to_string(), ext.value_bytes().to_vec()));
            }
        }
    }
    Ok(records)
}

fn xattrs_from_pax(pax: &[(String, Vec<u8>)]) -> HashMap<String, Vec<u8>> {
    pax.iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("SCHILY.xattr.")
                .map(|name| (name.to_string(), value.clone()))
        })
        .collect()
}

fn attr_from_header(
    header: &Header,
    kind: FileType,
    pax: &[(String, Vec<u8>)],
) -> Result<NodeAttr, RrwError> {
    let mtime = Timestamp::new(header.mtime()? as i64, 0);
    Ok(NodeAttr {
        kind,
        mode: header.mode()? & 0o7777,
        uid: header.uid()? as u32,
        gid: header.gid()? as u32,
        size: header.size()?,
        nlink: 1,
        rdev: 0,
        atime: pax_time(pax, "atime").unwrap_or(mtime),
        mtime,
        ctime: pax_time(pax, "ctime").unwrap_or(mtime),
    })
}

/// PAX stores times as decimal seconds, possibly fractional.
fn pax_time(pax: &[(String, Vec<u8>)], key: &str) -> Option<Timestamp> {
    let raw = pax.iter().find(|(k, _)| k == key)?;
    let value: f64 = std::str::from_utf8(&raw.1).ok()?.trim().parse().ok()?;
    let sec = value.trunc() as i64;
    let nsec = ((value - value.trunc()) * 1e9) as u32;
    Some(Timestamp::new(sec, nsec))
}
