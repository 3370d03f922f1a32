//! Environment-driven configuration.

use std::path::PathBuf;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Clone, Debug)]
pub struct CcrConfig {
    pub host: String,
    pub port: u16,
    /// Metadata tars produced by uploads live here.
    pub store_path: PathBuf,
    /// Shared chunk pool (the blob source for localfs deployments).
    pub block_path: PathBuf,
    /// Per-host block cache used by mounts.
    pub cache_path: PathBuf,
    /// Scratch directory for spooling uploads before splitting.
    pub scratch_path: PathBuf,
    pub db_url: String,
    pub registry_host: String,
    pub registry_namespace: String,
}

impl CcrConfig {
    pub fn from_env() -> Self {
        let scratch = std::env::var("CCR_CHECKPOINT_RW_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        Self {
            host: env_or("CCR_HOST", "0.0.0.0"),
            port: env_or("CCR_PORT", "8080").parse().unwrap_or(8080),
            store_path: PathBuf::from(env_or("CCR_STORE_PATH", "/var/ccr/store")),
            block_path: PathBuf::from(env_or("CCR_BLOCK_PATH", "/var/ccr/blocks")),
            cache_path: PathBuf::from(env_or("RRW_CACHE_PATH", "/var/rrw/blocks")),
            scratch_path: scratch,
            db_url: env_or("CCR_DB_URL", "sqlite://ccr.db?mode=rwc"),
            registry_host: {
                let host = env_or("CCR_REGISTRY_HOST", "127.0.0.1:5000");
                host.trim_start_matches("http://")
                    .trim_start_matches("https://")
                    .to_string()
            },
            registry_namespace: env_or("CCR_REGISTRY_NAMESPACE", "checkpoints"),
        }
    }
}
