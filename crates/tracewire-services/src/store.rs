//! Tiered key/value store — in-process overlay with optional synchronous
//! write-through to a remote key/value service.
//!
//! Lookup policy: every `get` consults the in-process map first; on a miss
//! the remote tier (when configured) is queried and a hit is deserialized
//! and pulled into the map. Entries never expire — the overlay lives for
//! the process lifetime.
//!
//! `set` writes the overlay unconditionally and then writes through. A
//! remote failure surfaces to the caller and the local write stands, so the
//! overlay may run ahead of the remote after a failed write-through; the
//! local view's availability wins over strict consistency here, and callers
//! that cannot tolerate that configure the store without a remote tier
//! instead of relying on failure suppression.
//!
//! One reader/writer lock guards the overlay: concurrent `get`s share it,
//! `set`/`delete` take it exclusively, and independent stores never contend
//! with each other. Write-through happens under the write lock; the
//! populate step of a remote `get` hit reacquires the lock exclusively
//! after the fetch, so a miss never holds readers out while the network
//! round-trip is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::remote::RemoteKv;

/// Turns an application key into the flat string keyspace shared with the
/// remote tier, e.g. `"schema/" + package`.
pub type KeyTransform<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("remote value for {key} did not deserialize: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
    #[error("value did not serialize: {0}")]
    Serialize(serde_json::Error),
}

/// Two-tier cache for one entity type.
pub struct TieredStore<K: ?Sized, V> {
    overlay: RwLock<HashMap<String, Arc<V>>>,
    remote: Option<Arc<dyn RemoteKv>>,
    transform: KeyTransform<K>,
}

impl<K: ?Sized, V> TieredStore<K, V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(remote: Option<Arc<dyn RemoteKv>>, transform: KeyTransform<K>) -> Self {
        Self {
            overlay: RwLock::new(HashMap::new()),
            remote,
            transform,
        }
    }

    /// Look a value up, falling through to the remote tier on an overlay
    /// miss. A remote hit is cached into the overlay before returning.
    pub async fn get(&self, key: &K) -> Result<Option<Arc<V>>, StoreError> {
        let query_key = (self.transform)(key);

        {
            let overlay = self.overlay.read().await;
            if let Some(value) = overlay.get(&query_key) {
                tracing::trace!(key = %query_key, "found in overlay");
                return Ok(Some(value.clone()));
            }
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        let Some(raw) = remote
            .get(&query_key)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        else {
            return Ok(None);
        };

        let value: V = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key: query_key.clone(),
            source: e,
        })?;
        let value = Arc::new(value);
        self.overlay
            .write()
            .await
            .insert(query_key.clone(), value.clone());
        tracing::trace!(key = %query_key, "populated from remote");
        Ok(Some(value))
    }

    /// Write a value to the overlay and through to the remote tier.
    pub async fn set(&self, key: &K, value: V) -> Result<(), StoreError> {
        let query_key = (self.transform)(key);
        let serialized = serde_json::to_string(&value).map_err(StoreError::Serialize)?;

        let mut overlay = self.overlay.write().await;
        overlay.insert(query_key.clone(), Arc::new(value));

        let Some(remote) = &self.remote else {
            return Ok(());
        };
        remote
            .set(&query_key, &serialized)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Remove a key from both tiers.
    pub async fn delete(&self, key: &K) -> Result<(), StoreError> {
        let query_key = (self.transform)(key);

        let mut overlay = self.overlay.write().await;
        overlay.remove(&query_key);

        let Some(remote) = &self.remote else {
            return Ok(());
        };
        remote
            .delete(&query_key)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Number of entries in the in-process overlay.
    pub async fn len(&self) -> usize {
        self.overlay.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
