//! OCI-distribution HTTP backend.
//!
//! Chunks live as blobs under a registry namespace; the digest is
//! `sha256:<key>`. Reads use ranged blob GETs so a cold cache never pulls
//! more than one block; uploads use the monolithic upload-session flow and
//! treat an already-present digest as success.

use async_trait::async_trait;
use reqwest::{StatusCode, header};

use crate::cadapter::client::{BlobBackend, BlobError};

pub struct RegistryBackend {
    http: reqwest::Client,
    base: String,
    namespace: String,
}

impl RegistryBackend {
    pub fn new(host: impl Into<String>, namespace: impl Into<String>) -> Self {
        let mut base = host.into();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{base}");
        }
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            namespace: namespace.into(),
        }
    }

    /// Backend from `CCR_REGISTRY_HOST` / `CCR_REGISTRY_NAMESPACE`.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("CCR_REGISTRY_HOST").ok()?;
        let namespace = std::env::var("CCR_REGISTRY_NAMESPACE").ok()?;
        Some(Self::new(host, namespace))
    }

    fn blob_url(&self, key: &str) -> String {
        format!("{}/v2/{}/blobs/sha256:{key}", self.base, self.namespace)
    }

    fn upload_url(&self) -> String {
        format!("{}/v2/{}/blobs/uploads/", self.base, self.namespace)
    }
}

fn transport(e: reqwest::Error) -> BlobError {
    BlobError::Backend(e.to_string())
}

#[async_trait]
impl BlobBackend for RegistryBackend {
    async fn put_blob(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        // Skip the upload when the registry already holds the digest.
        let head = self
            .http
            .head(self.blob_url(key))
            .send()
            .await
            .map_err(transport)?;
        if head.status().is_success() {
            return Ok(());
        }

        let start = self
            .http
            .post(self.upload_url())
            .send()
            .await
            .map_err(transport)?;
        if !start.status().is_success() {
            return Err(BlobError::Backend(format!(
                "upload session failed with status {}",
                start.status()
            )));
        }
        let location = start
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| BlobError::Backend("upload session without location".into()))?;
        let location = if location.starts_with('/') {
            format!("{}{location}", self.base)
        } else {
            location.to_string()
        };
        let sep = if location.contains('?') { '&' } else { '?' };

        let put = self
            .http
            .put(format!("{location}{sep}digest=sha256:{key}"))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(transport)?;
        if !put.status().is_success() {
            return Err(BlobError::Backend(format!(
                "blob upload failed with status {}",
                put.status()
            )));
        }
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let resp = self
            .http
            .get(self.blob_url(key))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound(key.to_string())),
            s if s.is_success() => Ok(resp.bytes().await.map_err(transport)?.to_vec()),
            s => Err(BlobError::Backend(format!("blob get failed with status {s}"))),
        }
    }

    async fn get_blob_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, BlobError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let resp = self
            .http
            .get(self.blob_url(key))
            .header(
                header::RANGE,
                format!("bytes={}-{}", offset, offset + length - 1),
            )
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound(key.to_string())),
            s if s.is_success() => Ok(resp.bytes().await.map_err(transport)?.to_vec()),
            s => Err(BlobError::Backend(format!(
                "ranged blob get failed with status {s}"
            ))),
        }
    }
}
