//! HTTP client for the checkpoint control service, used by the
//! container-runtime side of checkpoint and restore.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio_util::io::ReaderStream;

use crate::endpoint;
use crate::model::Checkpoint;

pub struct CcrClient {
    http: reqwest::Client,
    base_url: String,
}

impl CcrClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // Uploads of large checkpoints can take a while.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30 * 60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Client pointed at `CCR_SERVER_ENDPOINT`.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("CCR_SERVER_ENDPOINT")
            .context("CCR_SERVER_ENDPOINT is not set")?;
        Self::new(endpoint)
    }

    async fn request_for_checkpoint(&self, path: &str, req: &Checkpoint) -> Result<Checkpoint> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("request failed with status code {}", resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn create_checkpoint(&self, sandbox: &str, container: &str) -> Result<Checkpoint> {
        let req = Checkpoint {
            sandbox: sandbox.to_string(),
            container: container.to_string(),
            ..Default::default()
        };
        self.request_for_checkpoint(endpoint::CREATE_CHECKPOINT, &req)
            .await
    }

    pub async fn commit_checkpoint(&self, id: &str) -> Result<Checkpoint> {
        let req = Checkpoint {
            id: id.to_string(),
            ..Default::default()
        };
        self.request_for_checkpoint(endpoint::COMMIT_CHECKPOINT, &req)
            .await
    }

    pub async fn get_checkpoint(&self, sandbox: &str, container: &str) -> Result<Checkpoint> {
        let req = Checkpoint {
            sandbox: sandbox.to_string(),
            container: container.to_string(),
            ..Default::default()
        };
        self.request_for_checkpoint(endpoint::GET_CHECKPOINT, &req)
            .await
    }

    /// Stream a checkpoint tar to the server for splitting.
    pub async fn upload_tar(&self, id: &str, tar_path: impl AsRef<Path>) -> Result<Checkpoint> {
        let file = tokio::fs::File::open(tar_path.as_ref())
            .await
            .with_context(|| format!("open {}", tar_path.as_ref().display()))?;
        let resp = self
            .http
            .post(format!(
                "{}{}?id={}",
                self.base_url,
                endpoint::UPLOAD_TAR,
                id
            ))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("request failed with status code {}", resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn mount(&self, tarname: &str, path: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, endpoint::MOUNT))
            .query(&[("tarname", tarname), ("path", path)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("mount failed with status code {}", resp.status()));
        }
        Ok(())
    }

    pub async fn unmount(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, endpoint::UNMOUNT))
            .query(&[("path", path)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("unmount failed with status code {}", resp.status()));
        }
        Ok(())
    }
}
