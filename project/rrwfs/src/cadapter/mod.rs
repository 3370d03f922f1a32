//! Blob source backends.
//!
//! The engine is agnostic about where chunk bytes live: everything goes
//! through the [`client::BlobBackend`] trait. Two backends are provided:
//! - `localfs`: a flat directory of `hex(key)` files (shared NFS-style
//!   block pool, also the test double);
//! - `registry`: an OCI-distribution-style HTTP store with ranged GETs.

pub mod client;
pub mod localfs;
pub mod registry;

pub use client::{BlobBackend, BlobError};
pub use localfs::LocalFsBackend;
pub use registry::RegistryBackend;
