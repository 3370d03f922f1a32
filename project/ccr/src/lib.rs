//! Checkpoint control service for RRW lazy checkpoints.
//!
//! The server assigns monotonically increasing checkpoint rounds per
//! (sandbox, container), receives checkpoint tars and splits them into
//! metadata tars plus content-addressed chunks, and drives RRW mounts.
//! [`client::CcrClient`] mirrors the same surface for the runtime side.

pub mod api;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod model;
pub mod service;
pub mod state;
pub mod store;

pub use client::CcrClient;
pub use model::{CcrMount, Checkpoint};
