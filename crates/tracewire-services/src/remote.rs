//! Remote key/value tier.
//!
//! The backing service is swappable: the store only needs get/set/delete
//! over flat string keys, chosen once at construction. The stock
//! implementation talks to an HTTP key/value service — GET/PUT/DELETE
//! `{base}/kv/{key}`, with 404 meaning absent. The remote store is shared
//! across service instances and is the durability boundary; there are no
//! retries here, failures surface to the caller immediately.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum RemoteKvError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for key {key}")]
    UnexpectedStatus { status: u16, key: String },
}

#[async_trait]
pub trait RemoteKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteKvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), RemoteKvError>;
    async fn delete(&self, key: &str) -> Result<(), RemoteKvError>;
}

/// HTTP key/value client.
pub struct HttpKv {
    client: reqwest::Client,
    base: String,
}

impl HttpKv {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, RemoteKvError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { client, base })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base, key)
    }
}

#[async_trait]
impl RemoteKv for HttpKv {
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteKvError> {
        let resp = self.client.get(self.url(key)).send().await?;
        match resp.status().as_u16() {
            200 => Ok(Some(resp.text().await?)),
            404 => Ok(None),
            status => Err(RemoteKvError::UnexpectedStatus {
                status,
                key: key.to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RemoteKvError> {
        let resp = self
            .client
            .put(self.url(key))
            .body(value.to_string())
            .send()
            .await?;
        match resp.status().as_u16() {
            200 | 201 | 204 => Ok(()),
            status => Err(RemoteKvError::UnexpectedStatus {
                status,
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteKvError> {
        let resp = self.client.delete(self.url(key)).send().await?;
        // Deleting an absent key is fine.
        match resp.status().as_u16() {
            200 | 204 | 404 => Ok(()),
            status => Err(RemoteKvError::UnexpectedStatus {
                status,
                key: key.to_string(),
            }),
        }
    }
}
