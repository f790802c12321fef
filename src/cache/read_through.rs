//! Read-through cache core.
//!
//! [`ReadThroughCache::read_through`] serves fresh entries and resolves
//! misses. [`ReadThroughCache::read_through_stale`] additionally serves
//! expired entries immediately while a single background task per key
//! refreshes them.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::{CacheEntry, Clock};
use super::store::TieredStore;
use super::tickets::RevalidationTickets;

const METRIC_HIT: &str = "tessera_cache_hit_total";
const METRIC_MISS: &str = "tessera_cache_miss_total";
const METRIC_REVALIDATE: &str = "tessera_cache_revalidate_total";
const METRIC_STORE_ERROR: &str = "tessera_cache_store_error_total";

/// Value served by a stale-while-revalidate read, serialized as the response
/// envelope `{ data, cachedAt, revalidatedAt?, fromCache }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cached<T> {
    pub data: T,
    pub cached_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revalidated_at: Option<i64>,
    pub from_cache: bool,
}

impl<T> Cached<T> {
    fn from_entry(entry: CacheEntry<T>, from_cache: bool) -> Self {
        Self {
            data: entry.value,
            cached_at: entry.cached_at,
            revalidated_at: entry.revalidated_at,
            from_cache,
        }
    }
}

#[derive(Clone)]
pub struct ReadThroughCache {
    store: TieredStore,
    clock: Arc<dyn Clock>,
    tickets: RevalidationTickets,
    stale_grace: Duration,
}

impl ReadThroughCache {
    /// `stale_grace` is how long an entry written by a stale-while-revalidate
    /// read stays in the store after it expires.
    pub fn new(store: TieredStore, clock: Arc<dyn Clock>, stale_grace: Duration) -> Self {
        Self {
            store,
            clock,
            tickets: RevalidationTickets::new(),
            stale_grace,
        }
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Number of background refreshes currently running.
    pub fn pending_revalidations(&self) -> usize {
        self.tickets.len()
    }

    /// Return the fresh cached value for `key`, or resolve, store and return it.
    ///
    /// Resolver errors propagate. Store failures never do; a value that could
    /// not be persisted is still returned.
    pub async fn read_through<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        resolver: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(entry) = self.lookup::<T>(key).await {
            if entry.is_fresh(self.clock.now_millis()) {
                debug!(key = %key, outcome = "hit", "read-through");
                counter!(METRIC_HIT, "freshness" => "fresh").increment(1);
                return Ok(entry.value);
            }
        }

        debug!(key = %key, outcome = "miss", "read-through");
        counter!(METRIC_MISS).increment(1);

        let value = resolver().await?;
        let entry = CacheEntry::new(value, self.clock.now_millis(), ttl);
        let payload = encode(key, &entry);
        if let Some(payload) = payload {
            self.store.set(key, &payload, Some(ttl)).await;
        }
        Ok(entry.value)
    }

    /// Serve any cached entry, fresh or stale; refresh stale ones in the
    /// background. Falls back to a resolving read when nothing is cached.
    pub async fn read_through_stale<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        resolver: F,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if let Some(entry) = self.lookup::<T>(key).await {
            let fresh = entry.is_fresh(self.clock.now_millis());
            let freshness = if fresh { "fresh" } else { "stale" };
            debug!(key = %key, outcome = "hit", freshness, "read-through-stale");
            counter!(METRIC_HIT, "freshness" => freshness).increment(1);
            if !fresh {
                self.schedule_revalidation(key, ttl, resolver);
            }
            return Ok(Cached::from_entry(entry, true));
        }

        debug!(key = %key, outcome = "miss", "read-through-stale");
        counter!(METRIC_MISS).increment(1);

        let value = resolver().await?;
        let entry = CacheEntry::new(value, self.clock.now_millis(), ttl);
        let payload = encode(key, &entry);
        if let Some(payload) = payload {
            self.store
                .set(key, &payload, Some(self.stale_store_ttl(ttl)))
                .await;
        }
        Ok(Cached::from_entry(entry, false))
    }

    /// Delete `key` from every tier. A background refresh already running
    /// for `key` is revoked and will not write its result.
    pub async fn invalidate(&self, key: &str) {
        let revoked = self.tickets.revoke(key);
        debug!(key = %key, revoked_refresh = revoked, "cache invalidate");
        self.store.delete(key).await;
    }

    fn schedule_revalidation<T, E, F, Fut>(&self, key: &str, ttl: Duration, resolver: F)
    where
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let Some(ticket) = self.tickets.acquire(key) else {
            debug!(key = %key, "revalidation already in flight");
            return;
        };

        let cache = self.clone();
        tokio::spawn(async move {
            let key = ticket.key().to_string();
            match resolver().await {
                Ok(_) if ticket.is_revoked() => {
                    counter!(METRIC_REVALIDATE, "outcome" => "revoked").increment(1);
                    debug!(key = %key, "background revalidation discarded after invalidation");
                }
                Ok(value) => {
                    let entry =
                        CacheEntry::new(value, cache.clock.now_millis(), ttl).revalidated();
                    let payload = encode(&key, &entry);
                    if let Some(payload) = payload {
                        cache
                            .store
                            .set(&key, &payload, Some(cache.stale_store_ttl(ttl)))
                            .await;
                    }
                    // An invalidation may have landed while the write was in progress.
                    if ticket.is_revoked() {
                        cache.store.delete(&key).await;
                        counter!(METRIC_REVALIDATE, "outcome" => "revoked").increment(1);
                        debug!(key = %key, "background revalidation discarded after invalidation");
                    } else {
                        counter!(METRIC_REVALIDATE, "outcome" => "ok").increment(1);
                        debug!(key = %key, "background revalidation stored");
                    }
                }
                Err(error) => {
                    counter!(METRIC_REVALIDATE, "outcome" => "error").increment(1);
                    warn!(key = %key, error = %error, "background revalidation failed; keeping stale entry");
                }
            }
            drop(ticket);
        });
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = self.store.get(key).await?;
        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(key = %key, error = %error, "discarding undecodable cache entry");
                counter!(METRIC_STORE_ERROR, "op" => "decode").increment(1);
                self.store.delete(key).await;
                None
            }
        }
    }

    fn stale_store_ttl(&self, ttl: Duration) -> Duration {
        ttl.saturating_add(self.stale_grace)
    }
}

fn encode<T: Serialize>(key: &str, entry: &CacheEntry<T>) -> Option<String> {
    match serde_json::to_string(entry) {
        Ok(payload) => Some(payload),
        Err(error) => {
            warn!(key = %key, error = %error, "cache entry could not be encoded");
            counter!(METRIC_STORE_ERROR, "op" => "encode").increment(1);
            None
        }
    }
}
