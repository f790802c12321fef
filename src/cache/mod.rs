//! Tessera cache system
//!
//! Read-through caching over two tiers:
//!
//! - **Distributed (Redis)**: shared by every process, connected lazily on first use
//! - **In-process (memory)**: used whenever no Redis client is available
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! redis_url = "redis://cache:6379/0"
//! redis_tls = false
//! key_prefix = "prod"
//!
//! [cache.ttl]
//! posts_seconds = 60
//! # ... see config.rs for all options
//! ```

mod config;
mod entry;
mod index;
mod keys;
mod lock;
mod memory;
mod read_through;
mod remote;
mod store;
mod tickets;

use std::sync::Arc;

pub use config::{CacheConfig, PRESET_LIST_LIMITS, TtlPolicy};
pub use entry::{CacheEntry, Clock, ManualClock, SystemClock};
pub use index::ListKeyIndex;
pub use keys::{
    CanonicalQuery, KeyPart, KeySpace, Namespace, build_key, build_prefixed_key,
    normalize_list_query, token_digest,
};
pub use memory::MemoryStore;
pub use read_through::{Cached, ReadThroughCache};
pub use remote::{RedisConnector, RedisSettings, RedisStore};
pub use store::{KvStore, RemoteStatus, RemoteTier, StoreError, TieredStore};
pub use tickets::{RevalidationTicket, RevalidationTickets};

/// Wire the tiered store and read-through core from configuration.
///
/// No connection is attempted here; the Redis tier connects on first use.
pub fn build_read_through(config: &CacheConfig, clock: Arc<dyn Clock>) -> ReadThroughCache {
    let local = Arc::new(MemoryStore::new(clock.clone()));
    let settings = config.redis_settings();
    let remote: Option<Arc<dyn RemoteTier>> = settings
        .effective_url()
        .is_some()
        .then(|| Arc::new(RedisConnector::new(settings)) as Arc<dyn RemoteTier>);
    let store = TieredStore::new(remote, local);
    ReadThroughCache::new(store, clock, config.stale_grace())
}
