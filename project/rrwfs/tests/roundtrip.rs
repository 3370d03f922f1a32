//! Split a representative tar and read everything back through the
//! filesystem, comparing bytes and metadata against the source.

use std::ffi::OsStr;
use std::sync::Arc;

use futures_util::StreamExt;
use rfuse3::raw::{Filesystem, Request};
use rfuse3::raw::reply::ReplyXAttr;
use tar::{Builder, EntryType, Header};

use rrwfs::cadapter::localfs::LocalFsBackend;
use rrwfs::chunk::split_tar;
use rrwfs::chunk::store::BlockStore;
use rrwfs::fuse::adapter::RrwFs;
use rrwfs::fuse::build::build_nodes;
use rrwfs::fuse::node::NodeTable;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn file_header(mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_mode(mode);
    header.set_uid(42);
    header.set_gid(43);
    header.set_mtime(1_700_000_000);
    header.set_size(size);
    header.set_cksum();
    header
}

/// Directories, an inline file, a multi-chunk file with an xattr, a
/// symlink, a hard link and a fifo.
fn source_tar() -> Vec<u8> {
    let mut raw = Vec::new();
    {
        let mut builder = Builder::new(&mut raw);

        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_mode(0o711);
        dir.set_uid(0);
        dir.set_gid(0);
        dir.set_size(0);
        dir.set_cksum();
        builder
            .append_data(&mut dir, "srv/", std::io::empty())
            .unwrap();

        let mut small = file_header(0o600, 13);
        builder
            .append_data(&mut small, "srv/hello.txt", &b"hello, world\n"[..])
            .unwrap();

        builder
            .append_pax_extensions([("SCHILY.xattr.user.meta", &b"ok"[..])])
            .unwrap();
        let big = pattern(12_345);
        let mut big_header = file_header(0o644, big.len() as u64);
        builder
            .append_data(&mut big_header, "srv/payload.bin", big.as_slice())
            .unwrap();

        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Link);
        link.set_uid(0);
        link.set_gid(0);
        link.set_size(0);
        link.set_cksum();
        builder
            .append_link(&mut link, "srv/payload.hard", "srv/payload.bin")
            .unwrap();

        let mut sym = Header::new_gnu();
        sym.set_entry_type(EntryType::Symlink);
        sym.set_uid(0);
        sym.set_gid(0);
        sym.set_size(0);
        sym.set_cksum();
        builder
            .append_link(&mut sym, "srv/current", "payload.bin")
            .unwrap();

        let mut fifo = Header::new_gnu();
        fifo.set_entry_type(EntryType::Fifo);
        fifo.set_mode(0o620);
        fifo.set_uid(0);
        fifo.set_gid(0);
        fifo.set_size(0);
        fifo.set_cksum();
        builder
            .append_data(&mut fifo, "srv/pipe", std::io::empty())
            .unwrap();

        builder.finish().unwrap();
    }
    raw
}

async fn lookup_path(fs: &RrwFs, path: &str) -> u64 {
    let mut ino = NodeTable::ROOT_INO;
    for comp in path.split('/') {
        ino = fs
            .lookup(Request::default(), ino, OsStr::new(comp))
            .await
            .unwrap()
            .attr
            .ino;
    }
    ino
}

async fn read_all(fs: &RrwFs, ino: u64, size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(size);
    let mut offset = 0u64;
    // Deliberately small read size to force multi-call assembly.
    loop {
        let reply = fs
            .read(Request::default(), ino, 0, offset, 1000)
            .await
            .unwrap();
        if reply.data.is_empty() {
            break;
        }
        offset += reply.data.len() as u64;
        out.extend_from_slice(&reply.data);
    }
    out
}

#[tokio::test]
async fn split_then_mount_reproduces_the_source() {
    let remote = tempfile::tempdir().unwrap();
    let backend = Arc::new(LocalFsBackend::new(remote.path()));
    let cache = tempfile::tempdir().unwrap();
    let meta_path = cache.path().join("meta.tar");
    let report = split_tar(
        std::io::Cursor::new(source_tar()),
        std::fs::File::create(&meta_path).unwrap(),
        backend.clone(),
    )
    .await
    .unwrap();
    assert_eq!(report.entries, 6);
    assert_eq!(report.chunked_files, 1);

    let store = Arc::new(BlockStore::new(backend, cache.path().join("blocks")).unwrap());
    let meta = std::fs::File::open(&meta_path).unwrap();
    let fs = RrwFs::new(build_nodes(meta, store).unwrap());

    // Directory attributes.
    let srv = lookup_path(&fs, "srv").await;
    let attr = fs.getattr(Request::default(), srv, None, 0).await.unwrap().attr;
    assert_eq!(attr.kind, rfuse3::FileType::Directory);
    assert_eq!(attr.perm, 0o711);

    // Inline file: bytes and header metadata.
    let hello = lookup_path(&fs, "srv/hello.txt").await;
    let attr = fs
        .getattr(Request::default(), hello, None, 0)
        .await
        .unwrap()
        .attr;
    assert_eq!(attr.size, 13);
    assert_eq!(attr.perm, 0o600);
    assert_eq!(attr.uid, 42);
    assert_eq!(attr.gid, 43);
    assert_eq!(read_all(&fs, hello, 13).await, b"hello, world\n");

    // Chunked file: byte-for-byte reproduction across many short reads.
    let payload = lookup_path(&fs, "srv/payload.bin").await;
    assert_eq!(read_all(&fs, payload, 12_345).await, pattern(12_345));

    // Hard link resolves to the same inode, same bytes.
    let hard = lookup_path(&fs, "srv/payload.hard").await;
    assert_eq!(hard, payload);
    assert_eq!(read_all(&fs, hard, 12_345).await, pattern(12_345));

    // Symlink target.
    let current = lookup_path(&fs, "srv/current").await;
    let reply = fs.readlink(Request::default(), current).await.unwrap();
    assert_eq!(&reply.data[..], b"payload.bin");

    // Fifo keeps its kind and mode.
    let pipe = lookup_path(&fs, "srv/pipe").await;
    let attr = fs.getattr(Request::default(), pipe, None, 0).await.unwrap().attr;
    assert_eq!(attr.kind, rfuse3::FileType::NamedPipe);
    assert_eq!(attr.perm, 0o620);

    // Xattr round-trip.
    match fs
        .getxattr(Request::default(), payload, OsStr::new("user.meta"), 16)
        .await
        .unwrap()
    {
        ReplyXAttr::Data(data) => assert_eq!(&data[..], b"ok"),
        ReplyXAttr::Size(_) => panic!("expected xattr data"),
    }

    // The directory listing matches the source tree.
    let reply = fs.readdir(Request::default(), srv, 0, 0).await.unwrap();
    let names: Vec<String> = reply
        .entries
        .map(|e| e.unwrap().name.to_string_lossy().into_owned())
        .collect()
        .await;
    assert_eq!(
        names,
        vec![".", "..", "current", "hello.txt", "payload.bin", "payload.hard", "pipe"]
    );
}

#[tokio::test]
async fn reads_are_identical_after_cache_reset() {
    let remote = tempfile::tempdir().unwrap();
    let backend = Arc::new(LocalFsBackend::new(remote.path()));
    let scratch = tempfile::tempdir().unwrap();
    let meta_path = scratch.path().join("meta.tar");
    split_tar(
        std::io::Cursor::new(source_tar()),
        std::fs::File::create(&meta_path).unwrap(),
        backend.clone(),
    )
    .await
    .unwrap();

    // First mount warms its own cache; the second starts cold.
    let expected = {
        let cache = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::new(backend.clone(), cache.path()).unwrap());
        let meta = std::fs::File::open(&meta_path).unwrap();
        let fs = RrwFs::new(build_nodes(meta, store).unwrap());
        let ino = lookup_path(&fs, "srv/payload.bin").await;
        read_all(&fs, ino, 12_345).await
    };

    let cache = tempfile::tempdir().unwrap();
    let store = Arc::new(BlockStore::new(backend, cache.path()).unwrap());
    let meta = std::fs::File::open(&meta_path).unwrap();
    let fs = RrwFs::new(build_nodes(meta, store).unwrap());
    let ino = lookup_path(&fs, "srv/payload.bin").await;
    assert_eq!(read_all(&fs, ino, 12_345).await, expected);
    assert_eq!(expected, pattern(12_345));
}
