//! Key/value store seam and the tiered store used by the read-through core.
//!
//! The distributed tier (Redis) is preferred whenever a client is
//! available; otherwise reads and writes go to the in-process map. Every
//! backend failure is logged and absorbed here so that a cache outage never
//! fails the surrounding request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::memory::MemoryStore;

const METRIC_STORE_ERROR: &str = "tessera_cache_store_error_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("redis pool unavailable: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("cache payload could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache backend failure: {0}")]
    Backend(String),
}

/// String-keyed, string-valued store with optional per-key TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Lazily connected distributed tier.
///
/// `connect` returns `None` when the tier is disabled or currently
/// unreachable; callers then fall back to the in-process map.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn connect(&self) -> Option<Arc<dyn KvStore>>;

    /// Whether a connection URL is configured at all.
    fn is_configured(&self) -> bool;
}

/// Availability of the distributed tier, reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Disabled,
    Connected,
    Unavailable,
}

#[derive(Clone)]
pub struct TieredStore {
    remote: Option<Arc<dyn RemoteTier>>,
    local: Arc<MemoryStore>,
}

impl TieredStore {
    pub fn new(remote: Option<Arc<dyn RemoteTier>>, local: Arc<MemoryStore>) -> Self {
        Self { remote, local }
    }

    /// Store backed only by the in-process map.
    pub fn local_only(local: Arc<MemoryStore>) -> Self {
        Self::new(None, local)
    }

    pub fn local(&self) -> &Arc<MemoryStore> {
        &self.local
    }

    async fn remote_store(&self) -> Option<Arc<dyn KvStore>> {
        match &self.remote {
            Some(remote) => remote.connect().await,
            None => None,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let (tier, result) = match self.remote_store().await {
            Some(store) => ("l2", store.get(key).await),
            None => ("l1", self.local.get(key).await),
        };
        match result {
            Ok(value) => value,
            Err(error) => {
                warn!(cache = tier, op = "get", key = %key, error = %error, "cache read failed; treating as miss");
                counter!(METRIC_STORE_ERROR, "op" => "get").increment(1);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let (tier, result) = match self.remote_store().await {
            Some(store) => ("l2", store.set(key, value, ttl).await),
            None => ("l1", self.local.set(key, value, ttl).await),
        };
        match result {
            Ok(()) => debug!(cache = tier, key = %key, "cache entry stored"),
            Err(error) => {
                warn!(cache = tier, op = "set", key = %key, error = %error, "cache write failed; continuing");
                counter!(METRIC_STORE_ERROR, "op" => "set").increment(1);
            }
        }
    }

    /// Delete from both tiers.
    pub async fn delete(&self, key: &str) {
        if let Some(store) = self.remote_store().await {
            if let Err(error) = store.delete(key).await {
                warn!(cache = "l2", op = "delete", key = %key, error = %error, "cache delete failed");
                counter!(METRIC_STORE_ERROR, "op" => "delete").increment(1);
            }
        }
        if let Err(error) = self.local.delete(key).await {
            warn!(cache = "l1", op = "delete", key = %key, error = %error, "cache delete failed");
        }
    }

    pub async fn remote_status(&self) -> RemoteStatus {
        match &self.remote {
            Some(remote) if remote.is_configured() => match remote.connect().await {
                Some(_) => RemoteStatus::Connected,
                None => RemoteStatus::Unavailable,
            },
            _ => RemoteStatus::Disabled,
        }
    }
}
