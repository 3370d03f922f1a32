//! HTTP paths shared by the server and the client.

pub const GET_CHECKPOINT: &str = "/getCheckpoint";
pub const CREATE_CHECKPOINT: &str = "/createCheckpoint";
pub const COMMIT_CHECKPOINT: &str = "/commitCheckpoint";
pub const UPLOAD_TAR: &str = "/uploadTar";
pub const MOUNT: &str = "/mount";
pub const UNMOUNT: &str = "/unmount";
