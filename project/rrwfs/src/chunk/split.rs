//! Splitter: source tar in, metadata tar plus chunk uploads out.
//!
//! Every entry keeps its original header (mode, owner, times, xattr PAX
//! records, device numbers). Regular files smaller than one block are
//! rewritten to the inline small-file type; larger files are streamed in
//! 4 KiB reads, content-hashed, uploaded with bounded concurrency, and
//! replaced in the metadata tar by their chunk index. All other entry
//! kinds pass through with empty payloads.
//!
//! The tar walk is blocking work and runs on a blocking thread; chunks
//! flow through a bounded channel to the async uploader, which fans out
//! up to [`UPLOAD_CONCURRENCY`] puts at a time. The channel doubles as
//! backpressure: the walker stalls while the uploader is saturated.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tar::{Archive, Builder, EntryType};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use crate::cadapter::client::{BlobBackend, BlobError};
use crate::chunk::index::{ChunkRef, FileIndex};
use crate::chunk::{BLOCK_SIZE, SMALL_FILE_TYPE};
use crate::error::RrwError;

/// Uploads allowed in flight at once.
const UPLOAD_CONCURRENCY: usize = 20;

/// What a completed split produced.
#[derive(Debug, Default)]
pub struct SplitReport {
    pub entries: usize,
    pub chunked_files: usize,
    pub unique_chunks: usize,
}

struct ChunkUpload {
    key: String,
    data: Vec<u8>,
}

/// Split `source` into a metadata tar written to `meta` and chunk uploads
/// against `backend`. The metadata tar is only committed once every upload
/// has landed; any read, hash or upload error aborts the whole operation.
pub async fn split_tar<R, W>(
    source: R,
    meta: W,
    backend: Arc<dyn BlobBackend>,
) -> Result<SplitReport, RrwError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (chunk_tx, chunk_rx) = mpsc::channel::<ChunkUpload>(UPLOAD_CONCURRENCY);
    let uploader = tokio::spawn(upload_chunks(chunk_rx, backend));
    let walker = tokio::task::spawn_blocking(move || walk_entries(source, meta, chunk_tx));

    let walked = walker.await.map_err(|_| RrwError::Canceled)?;
    let uploaded = uploader.await.map_err(|_| RrwError::Canceled)?;
    uploaded?;
    let (mut builder, report) = walked?;

    // Every chunk is durable; commit the metadata tar.
    builder.finish()?;
    Ok(report)
}

async fn upload_chunks(
    mut rx: mpsc::Receiver<ChunkUpload>,
    backend: Arc<dyn BlobBackend>,
) -> Result<(), RrwError> {
    let semaphore = Arc::new(Semaphore::new(UPLOAD_CONCURRENCY));
    let mut uploads: JoinSet<Result<(), BlobError>> = JoinSet::new();

    while let Some(chunk) = rx.recv().await {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RrwError::Canceled)?;
        let backend = Arc::clone(&backend);
        uploads.spawn(async move {
            let _permit = permit;
            backend.put_blob(&chunk.key, &chunk.data).await
        });
    }

    // Join barrier: drain the fan-out and surface the first failure.
    while let Some(joined) = uploads.join_next().await {
        joined.map_err(|_| RrwError::Canceled)??;
    }
    Ok(())
}

/// The blocking half: iterate the source tar, write metadata entries, and
/// hand chunk payloads to the uploader. Returns the builder unfinished so
/// the caller can commit it after the upload barrier.
fn walk_entries<R: Read, W: Write>(
    source: R,
    meta: W,
    chunk_tx: mpsc::Sender<ChunkUpload>,
) -> Result<(Builder<W>, SplitReport), RrwError> {
    let mut archive = Archive::new(source);
    let mut builder = Builder::new(meta);
    let mut seen_keys: HashSet<[u8; 32]> = HashSet::new();
    let mut report = SplitReport::default();

    for entry in archive
        .entries()
        .map_err(|e| RrwError::MalformedArchive(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| RrwError::MalformedArchive(e.to_string()))?;
        let path = entry.path()?.into_owned();
        let size = entry.size();

        // Carry xattr PAX records over to the matching metadata entry.
        let xattrs: Vec<(String, Vec<u8>)> = match entry.pax_extensions()? {
            Some(exts) => exts
                .filter_map(|ext| ext.ok())
                .filter_map(|ext| {
                    let key = ext.key().ok()?;
                    key.starts_with("SCHILY.xattr.")
                        .then(|| (key.to_string(), ext.value_bytes().to_vec()))
                })
                .collect(),
            None => Vec::new(),
        };
        if !xattrs.is_empty() {
            builder.append_pax_extensions(xattrs.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?;
        }

        let mut header = entry.header().clone();
        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous if size < BLOCK_SIZE => {
                header.set_entry_type(EntryType::new(SMALL_FILE_TYPE));
                header.set_size(size);
                let mut buf = Vec::with_capacity(size as usize);
                entry.read_to_end(&mut buf)?;
                builder.append_data(&mut header, &path, buf.as_slice())?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let chunks = read_chunks(&mut entry, size, &chunk_tx, &mut seen_keys)?;
                let index = FileIndex { size, chunks };
                let encoded = index.to_bytes();
                header.set_size(encoded.len() as u64);
                builder.append_data(&mut header, &path, encoded.as_slice())?;
                report.chunked_files += 1;
            }
            EntryType::Symlink | EntryType::Link => {
                let target = entry.link_name()?.ok_or_else(|| {
                    RrwError::MalformedArchive(format!(
                        "link entry {} without target",
                        path.display()
                    ))
                })?;
                header.set_size(0);
                builder.append_link(&mut header, &path, target)?;
            }
            // Directories, fifos and device nodes copy through verbatim.
            _ => {
                header.set_size(0);
                builder.append_data(&mut header, &path, std::io::empty())?;
            }
        }
        report.entries += 1;
    }

    report.unique_chunks = seen_keys.len();
    Ok((builder, report))
}

fn read_chunks<R: Read>(
    source: &mut R,
    size: u64,
    chunk_tx: &mpsc::Sender<ChunkUpload>,
    seen_keys: &mut HashSet<[u8; 32]>,
) -> Result<Vec<ChunkRef>, RrwError> {
    let mut chunks = Vec::with_capacity(size.div_ceil(BLOCK_SIZE) as usize);

    let full_chunks = size / BLOCK_SIZE;
    let tail = size % BLOCK_SIZE;
    for i in 0..full_chunks + u64::from(tail != 0) {
        let len = if i < full_chunks { BLOCK_SIZE } else { tail } as usize;
        let mut buf = vec![0u8; len];
        source.read_exact(&mut buf)?;

        let key: [u8; 32] = Sha256::digest(&buf).into();
        chunks.push(ChunkRef {
            key,
            size: len as u64,
        });

        // Content addressing makes re-uploads harmless; still skip chunks
        // this split already scheduled.
        if !seen_keys.insert(key) {
            continue;
        }

        chunk_tx
            .blocking_send(ChunkUpload {
                key: hex::encode(key),
                data: buf,
            })
            .map_err(|_| RrwError::Canceled)?;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::localfs::LocalFsBackend;
    use std::io::Cursor;
    use tar::Header;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn append_file(builder: &mut Builder<&mut Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.set_mode(0o644);
        header.set_uid(1000);
        header.set_gid(1000);
        header.set_mtime(1_700_000_000);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn source_tar(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut raw = Vec::new();
        {
            let mut builder = Builder::new(&mut raw);
            for (path, data) in files {
                append_file(&mut builder, path, data);
            }
            builder.finish().unwrap();
        }
        raw
    }

    async fn split_to_meta(source: Vec<u8>) -> (Vec<u8>, SplitReport, tempfile::TempDir) {
        let remote = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalFsBackend::new(remote.path()));
        let meta_dir = tempfile::tempdir().unwrap();
        let meta_path = meta_dir.path().join("meta.tar");
        let meta = std::fs::File::create(&meta_path).unwrap();
        let report = split_tar(Cursor::new(source), meta, backend).await.unwrap();
        (std::fs::read(&meta_path).unwrap(), report, remote)
    }

    fn blob_count(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn small_file_is_inlined_with_sentinel_type() {
        let body = b"hello, world\n".to_vec();
        let (meta, report, remote) =
            split_to_meta(source_tar(&[("hello.txt", body.clone())])).await;

        assert_eq!(report.entries, 1);
        assert_eq!(report.chunked_files, 0);
        // No blobs for inline files.
        assert_eq!(blob_count(&remote), 0);

        let mut archive = Archive::new(meta.as_slice());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type().as_byte(), SMALL_FILE_TYPE);
        assert_eq!(entry.size(), body.len() as u64);
        let mut inline = Vec::new();
        entry.read_to_end(&mut inline).unwrap();
        assert_eq!(inline, body);
    }

    #[tokio::test]
    async fn single_block_file_uploads_one_addressed_chunk() {
        let body = vec![0u8; 4096];
        let (meta, report, remote) = split_to_meta(source_tar(&[("zeros", body.clone())])).await;

        assert_eq!(report.chunked_files, 1);
        assert_eq!(report.unique_chunks, 1);
        assert_eq!(blob_count(&remote), 1);

        // Address stability: the blob key is the hex SHA-256 of the chunk.
        let expected = hex::encode(Sha256::digest(&body));
        assert!(remote.path().join(&expected).exists());

        let mut archive = Archive::new(meta.as_slice());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type(), EntryType::Regular);
        let mut payload = Vec::new();
        entry.read_to_end(&mut payload).unwrap();
        let index = FileIndex::from_bytes(&payload).unwrap();
        assert_eq!(index.size, 4096);
        assert_eq!(index.chunks.len(), 1);
        assert_eq!(index.chunks[0].size, 4096);
    }

    #[tokio::test]
    async fn short_tail_gets_its_own_chunk() {
        let body = pattern(5000);
        let (meta, _report, remote) = split_to_meta(source_tar(&[("f", body.clone())])).await;
        assert_eq!(blob_count(&remote), 2);

        let mut archive = Archive::new(meta.as_slice());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut payload = Vec::new();
        entry.read_to_end(&mut payload).unwrap();
        let index = FileIndex::from_bytes(&payload).unwrap();
        assert_eq!(
            index.chunks.iter().map(|c| c.size).collect::<Vec<_>>(),
            vec![4096, 904]
        );
        // Size law.
        assert_eq!(index.chunks.iter().map(|c| c.size).sum::<u64>(), index.size);

        // Tail chunk bytes land under their own key.
        let tail_key = hex::encode(Sha256::digest(&body[4096..]));
        assert_eq!(
            std::fs::read(remote.path().join(tail_key)).unwrap(),
            &body[4096..]
        );
    }

    #[tokio::test]
    async fn exact_multiple_yields_no_tail_chunk() {
        let body = pattern(8192);
        let (meta, _report, _remote) = split_to_meta(source_tar(&[("f", body)])).await;

        let mut archive = Archive::new(meta.as_slice());
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut payload = Vec::new();
        entry.read_to_end(&mut payload).unwrap();
        let index = FileIndex::from_bytes(&payload).unwrap();
        assert_eq!(index.chunks.len(), 2);
        assert!(index.chunks.iter().all(|c| c.size == 4096));
    }

    #[tokio::test]
    async fn identical_content_uploads_exactly_one_blob() {
        let body = vec![9u8; 4096];
        let (_meta, report, remote) =
            split_to_meta(source_tar(&[("a", body.clone()), ("b", body)])).await;

        assert_eq!(report.chunked_files, 2);
        assert_eq!(report.unique_chunks, 1);
        assert_eq!(blob_count(&remote), 1);
    }

    #[tokio::test]
    async fn zero_length_file_takes_the_inline_path() {
        let (meta, _report, remote) = split_to_meta(source_tar(&[("empty", Vec::new())])).await;
        assert_eq!(blob_count(&remote), 0);

        let mut archive = Archive::new(meta.as_slice());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type().as_byte(), SMALL_FILE_TYPE);
        assert_eq!(entry.size(), 0);
    }

    #[tokio::test]
    async fn header_metadata_survives_the_split() {
        let (meta, _report, _remote) = split_to_meta(source_tar(&[("f", pattern(5000))])).await;

        let mut archive = Archive::new(meta.as_slice());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        let header = entry.header();
        assert_eq!(header.mode().unwrap(), 0o644);
        assert_eq!(header.uid().unwrap(), 1000);
        assert_eq!(header.gid().unwrap(), 1000);
        assert_eq!(header.mtime().unwrap(), 1_700_000_000);
    }

    #[tokio::test]
    async fn truncated_source_aborts_the_split() {
        let mut source = source_tar(&[("f", pattern(5000))]);
        source.truncate(1024);

        let remote = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalFsBackend::new(remote.path()));
        let meta_dir = tempfile::tempdir().unwrap();
        let meta = std::fs::File::create(meta_dir.path().join("meta.tar")).unwrap();
        let result = split_tar(Cursor::new(source), meta, backend).await;
        assert!(result.is_err());
    }
}
