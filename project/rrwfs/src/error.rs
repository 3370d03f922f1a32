//! Engine error kinds and their errno mapping for the FUSE layer.

use thiserror::Error;

use crate::cadapter::client::BlobError;

#[derive(Error, Debug)]
pub enum RrwError {
    /// Tar parse error, truncated chunk index, unknown type flag.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// The blob source failed or returned the wrong amount of data.
    #[error("remote i/o: {0}")]
    Remote(#[from] BlobError),

    /// Cache directory or scratch file failure.
    #[error("local i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("operation canceled")]
    Canceled,
}

impl RrwError {
    /// Errno surfaced to the host kernel for a failed operation.
    pub fn errno(&self) -> i32 {
        match self {
            RrwError::MalformedArchive(_) => libc::EINVAL,
            RrwError::Remote(BlobError::NotFound(_)) => libc::ENOENT,
            RrwError::Remote(_) => libc::EREMOTEIO,
            RrwError::Io(_) => libc::EIO,
            RrwError::NotFound(_) => libc::ENOENT,
            RrwError::Canceled => libc::EINTR,
        }
    }
}
