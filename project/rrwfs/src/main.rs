// rrw: mount a metadata tar at a mountpoint and block until unmounted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;

use rrwfs::cadapter::client::BlobBackend;
use rrwfs::cadapter::localfs::LocalFsBackend;
use rrwfs::cadapter::registry::RegistryBackend;
use rrwfs::chunk::store::BlockStore;
use rrwfs::fuse::adapter::RrwFs;
use rrwfs::fuse::build::build_nodes;
use rrwfs::fuse::mount::mount_fs;

/// Default locations, overridable from the environment.
const DEFAULT_BLOCK_PATH: &str = "/var/rrw/nfs-blocks";
const DEFAULT_CACHE_PATH: &str = "/var/rrw/blocks";

#[derive(Parser, Debug)]
#[command(author, version, about = "Mount an RRW metadata tar as a lazy read-only filesystem")]
struct Args {
    /// Metadata tar produced by the splitter
    metadata_tar: PathBuf,
    /// Empty directory to mount at
    mountpoint: PathBuf,
    /// Shared block pool directory (ignored when a registry is configured)
    #[arg(long)]
    block_root: Option<PathBuf>,
    /// Local block cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Warm whole files into the local cache when they are opened
    #[arg(long)]
    prefetch: bool,
}

fn blob_backend(args: &Args) -> Arc<dyn BlobBackend> {
    // A configured registry wins; otherwise fall back to the shared
    // directory pool.
    if let Some(registry) = RegistryBackend::from_env() {
        return Arc::new(registry);
    }
    let root = args
        .block_root
        .clone()
        .or_else(|| std::env::var("RRW_BLOCK_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOCK_PATH));
    Arc::new(LocalFsBackend::new(root))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cache_dir = args
        .cache_dir
        .clone()
        .or_else(|| std::env::var("RRW_CACHE_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH));

    let meta = std::fs::File::open(&args.metadata_tar)
        .with_context(|| format!("open metadata tar {}", args.metadata_tar.display()))?;

    let store = Arc::new(BlockStore::new(blob_backend(&args), &cache_dir)?);
    let mut fs = RrwFs::new(build_nodes(meta, store)?);
    if args.prefetch {
        fs = fs.with_prefetch_on_open();
    }
    let mut session = mount_fs(fs, &args.mountpoint)
        .await
        .with_context(|| format!("mount rrwfs at {}", args.mountpoint.display()))?;

    tokio::select! {
        res = session.wait() => {
            res.context("fuse session failed")?;
        }
        _ = signal::ctrl_c() => {
            session.unmount().await.context("unmount")?;
        }
    }

    Ok(())
}
