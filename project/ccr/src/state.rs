use std::collections::HashMap;

use rrwfs::MountSession;
use tokio::sync::RwLock;

use crate::config::CcrConfig;
use crate::store::CheckpointStore;

pub struct AppState {
    pub config: CcrConfig,
    pub store: CheckpointStore,
    /// Active RRW mounts keyed by mountpoint path.
    pub mounts: RwLock<HashMap<String, MountSession>>,
}

impl AppState {
    pub fn new(config: CcrConfig, store: CheckpointStore) -> Self {
        Self {
            config,
            store,
            mounts: RwLock::new(HashMap::new()),
        }
    }
}
