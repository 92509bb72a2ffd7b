//! HTTP admin/REST client for the source zone.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{
    BiLogEntry, BucketIndexInfo, BucketInstanceMeta, BucketListResult, DataLogInfo, DataLogPage,
    DataLogShardInfo,
};

/// A specialized `Result` type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors talking to the source zone.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The requested resource does not exist at the source.
    #[error("not found at source zone")]
    NotFound,

    /// The source returned a non-success status.
    #[error("source zone returned status {0}")]
    Status(u16),

    /// Transport-level failure.
    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not decode.
    #[error("failed to decode source response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether a retry after a delay may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(status) => *status >= 500,
            _ => false,
        }
    }

    /// Whether the error means the resource is gone at the source.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Read access to the source zone's logs, metadata, and listings.
#[async_trait]
pub trait SourceZoneClient: Send + Sync + 'static {
    /// Fetches the data-log shard count.
    async fn datalog_info(&self) -> Result<DataLogInfo>;

    /// Fetches the current position of one data-log shard.
    async fn datalog_shard_info(&self, shard_id: u32) -> Result<DataLogShardInfo>;

    /// Fetches data-log entries after `marker` for one shard.
    async fn datalog_shard_entries(&self, shard_id: u32, marker: &str) -> Result<DataLogPage>;

    /// Fetches the current position of one bucket-index log.
    async fn bucket_index_info(&self, instance_key: &str) -> Result<BucketIndexInfo>;

    /// Fetches bucket-index log entries after `marker`.
    async fn bucket_index_log(&self, instance_key: &str, marker: &str) -> Result<Vec<BiLogEntry>>;

    /// Lists all bucket-instance metadata keys.
    async fn bucket_instance_keys(&self) -> Result<Vec<String>>;

    /// Fetches metadata for one bucket instance.
    async fn bucket_instance_meta(&self, key: &str) -> Result<BucketInstanceMeta>;

    /// Versioned listing of one bucket shard, resuming at the given
    /// key/version markers.
    async fn list_bucket_shard(
        &self,
        bucket: &str,
        instance_key: &str,
        key_marker: &str,
        version_id_marker: &str,
    ) -> Result<BucketListResult>;
}

/// Connection settings for a source zone gateway.
#[derive(Debug, Clone)]
pub struct SourceEndpoint {
    /// Base URL of the gateway.
    pub url: String,
    /// Optional access key.
    pub access_key: Option<String>,
    /// Optional secret key.
    pub secret_key: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl SourceEndpoint {
    /// Creates an endpoint with default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), access_key: None, secret_key: None, timeout: Duration::from_secs(30) }
    }

    /// Sets authentication credentials.
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`SourceZoneClient`] over HTTP.
pub struct HttpSourceClient {
    http: reqwest::Client,
    base: String,
}

impl HttpSourceClient {
    /// Builds a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(endpoint: &SourceEndpoint) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(endpoint.timeout).build()?;
        Ok(Self { http, base: endpoint.url.trim_end_matches('/').to_string() })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "source zone request");
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SourceZoneClient for HttpSourceClient {
    async fn datalog_info(&self) -> Result<DataLogInfo> {
        self.get_json("/admin/log", &[("type", "data")]).await
    }

    async fn datalog_shard_info(&self, shard_id: u32) -> Result<DataLogShardInfo> {
        let id = shard_id.to_string();
        self.get_json("/admin/log", &[("type", "data"), ("id", &id), ("info", "")]).await
    }

    async fn datalog_shard_entries(&self, shard_id: u32, marker: &str) -> Result<DataLogPage> {
        let id = shard_id.to_string();
        self.get_json(
            "/admin/log",
            &[("type", "data"), ("id", &id), ("marker", marker), ("extra-info", "true")],
        )
        .await
    }

    async fn bucket_index_info(&self, instance_key: &str) -> Result<BucketIndexInfo> {
        self.get_json(
            "/admin/log",
            &[("type", "bucket-index"), ("bucket-instance", instance_key), ("info", "")],
        )
        .await
    }

    async fn bucket_index_log(&self, instance_key: &str, marker: &str) -> Result<Vec<BiLogEntry>> {
        self.get_json(
            "/admin/log",
            &[
                ("type", "bucket-index"),
                ("bucket-instance", instance_key),
                ("marker", marker),
                ("format", "json"),
            ],
        )
        .await
    }

    async fn bucket_instance_keys(&self) -> Result<Vec<String>> {
        self.get_json("/admin/metadata/bucket.instance", &[]).await
    }

    async fn bucket_instance_meta(&self, key: &str) -> Result<BucketInstanceMeta> {
        self.get_json("/admin/metadata/bucket.instance", &[("key", key)]).await
    }

    async fn list_bucket_shard(
        &self,
        bucket: &str,
        instance_key: &str,
        key_marker: &str,
        version_id_marker: &str,
    ) -> Result<BucketListResult> {
        let path = format!("/{bucket}");
        self.get_json(
            &path,
            &[
                ("rgwx-bucket-instance", instance_key),
                ("versions", ""),
                ("format", "json"),
                ("objs-container", "true"),
                ("key-marker", key_marker),
                ("version-id-marker", version_id_marker),
            ],
        )
        .await
    }
}
