//! Primary document store collaborator
//!
//! The gateway only sees the [`PrimaryStore`] trait. [`HttpPrimaryStore`]
//! is the production client: JSON over HTTP, payloads passed through as
//! opaque bytes.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::common::{PrimaryConfig, PrimaryError, QueryShape, Result};

/// A mutation sent to the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WriteOperation {
    Insert { document: Value },
    Update { id: String, changes: Value },
    Delete { id: String },
}

impl WriteOperation {
    /// Operation name used in logs.
    pub fn action(&self) -> &'static str {
        match self {
            WriteOperation::Insert { .. } => "insert",
            WriteOperation::Update { .. } => "update",
            WriteOperation::Delete { .. } => "delete",
        }
    }
}

#[async_trait]
pub trait PrimaryStore: Send + Sync + 'static {
    /// Run a query, returning the serialized result set.
    async fn query(
        &self,
        collection: &str,
        shape: &QueryShape,
    ) -> std::result::Result<Bytes, PrimaryError>;

    /// Apply one write, returning the store's serialized answer.
    async fn write(
        &self,
        collection: &str,
        op: &WriteOperation,
    ) -> std::result::Result<Bytes, PrimaryError>;

    /// Cheap liveness check.
    async fn ping(&self) -> std::result::Result<(), PrimaryError>;
}

/// Primary store reached over HTTP.
#[derive(Clone)]
pub struct HttpPrimaryStore {
    client: reqwest::Client,
    base_url: String,
    query_timeout: Duration,
    write_timeout: Duration,
}

impl HttpPrimaryStore {
    /// Create a new client for the store at `config.base_url`.
    pub fn new(config: &PrimaryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.query_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            query_timeout: config.query_timeout(),
            write_timeout: config.write_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> std::result::Result<Bytes, PrimaryError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        if status.is_success() {
            Ok(body)
        } else if status.is_client_error() {
            Err(PrimaryError::Rejected(format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )))
        } else {
            Err(PrimaryError::Unavailable(format!("HTTP {}", status.as_u16())))
        }
    }
}

/// Transport failures are always transient.
fn classify(error: reqwest::Error, timeout: Duration) -> PrimaryError {
    if error.is_timeout() {
        PrimaryError::Timeout(timeout.as_millis() as u64)
    } else {
        PrimaryError::Unavailable(error.to_string())
    }
}

#[async_trait]
impl PrimaryStore for HttpPrimaryStore {
    async fn query(
        &self,
        collection: &str,
        shape: &QueryShape,
    ) -> std::result::Result<Bytes, PrimaryError> {
        let request = self
            .client
            .post(self.url(&format!("/collections/{}/query", collection)))
            .json(shape);
        self.send(request, self.query_timeout).await
    }

    async fn write(
        &self,
        collection: &str,
        op: &WriteOperation,
    ) -> std::result::Result<Bytes, PrimaryError> {
        let request = self
            .client
            .post(self.url(&format!("/collections/{}/write", collection)))
            .json(op);
        self.send(request, self.write_timeout).await
    }

    async fn ping(&self) -> std::result::Result<(), PrimaryError> {
        let request = self.client.get(self.url("/ping"));
        self.send(request, self.query_timeout).await.map(|_| ())
    }
}
