//! Mount and unmount helpers.
//!
//! On Linux, unprivileged mounts go through fusermount3; running as root
//! uses the plain mount path. Each call produces an independent
//! [`MountSession`], so one process can serve several mountpoints.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use rfuse3::MountOptions;
use rfuse3::raw::{MountHandle, Session};

use crate::cadapter::client::BlobBackend;
use crate::chunk::store::BlockStore;
use crate::error::RrwError;
use crate::fuse::adapter::RrwFs;
use crate::fuse::build::build_nodes;

/// One active mount: tearing it down unblocks outstanding reads.
pub struct MountSession {
    mountpoint: PathBuf,
    handle: MountHandle,
}

impl MountSession {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Block until the filesystem is unmounted (or the session fails).
    pub async fn wait(&mut self) -> std::io::Result<()> {
        (&mut self.handle).await
    }

    /// Tear the mount down. When the kernel still holds the mountpoint the
    /// teardown degrades to a lazy unmount, so this always completes.
    pub async fn unmount(self) -> Result<(), RrwError> {
        if let Err(e) = self.handle.unmount().await {
            warn!(
                "unmount of {} failed ({e}), falling back to lazy unmount",
                self.mountpoint.display()
            );
            let status = tokio::process::Command::new("fusermount3")
                .arg("-uz")
                .arg(&self.mountpoint)
                .status()
                .await?;
            if !status.success() {
                return Err(RrwError::Io(std::io::Error::other(format!(
                    "lazy unmount of {} failed",
                    self.mountpoint.display()
                ))));
            }
        }
        info!("unmounted {}", self.mountpoint.display());
        Ok(())
    }
}

fn default_mount_options() -> MountOptions {
    let mut options = MountOptions::default();
    options
        .fs_name("rrwfs")
        .read_only(true)
        .force_readdir_plus(true)
        .uid(unsafe { libc::getuid() })
        .gid(unsafe { libc::getgid() });
    options
}

/// Build the inode tree from `meta` and bind it under `mountpoint`.
/// The event loop runs in the background; the returned session waits on or
/// tears down the mount.
pub async fn mount_rrw<R: Read>(
    meta: R,
    backend: Arc<dyn BlobBackend>,
    cache_dir: impl AsRef<Path>,
    mountpoint: impl AsRef<Path>,
) -> Result<MountSession, RrwError> {
    let store = Arc::new(BlockStore::new(backend, cache_dir)?);
    let fs = RrwFs::new(build_nodes(meta, store)?);
    mount_fs(fs, mountpoint).await
}

/// Mount an already-built filesystem. Unprivileged when not running as
/// root (requires fusermount3 in PATH).
pub async fn mount_fs(
    fs: RrwFs,
    mountpoint: impl AsRef<Path>,
) -> Result<MountSession, RrwError> {
    let mountpoint = mountpoint.as_ref().to_path_buf();
    let session = Session::new(default_mount_options());
    let handle = if unsafe { libc::geteuid() } == 0 {
        session.mount(fs, &mountpoint).await?
    } else {
        session.mount_with_unprivileged(fs, &mountpoint).await?
    };
    info!("mounted rrwfs at {}", mountpoint.display());
    Ok(MountSession { mountpoint, handle })
}
