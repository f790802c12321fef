//! Cache configuration.
//!
//! Controls the distributed tier, key prefixing, list invalidation bounds and
//! the per-resource TTL policy.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::keys::KeySpace;
use super::remote::RedisSettings;

// Default values for cache configuration
pub(crate) const DEFAULT_REDIS_POOL_SIZE: usize = 8;
pub(crate) const DEFAULT_REDIS_TIMEOUT_MS: u64 = 2_000;
pub(crate) const DEFAULT_REDIS_RECONNECT_COOLDOWN_MS: u64 = 0;
pub(crate) const DEFAULT_STALE_GRACE_SECS: u64 = 86_400;
pub(crate) const DEFAULT_LIST_KEY_INDEX_LIMIT: usize = 256;
pub(crate) const DEFAULT_LIST_EVICTION_PAGES: u32 = 5;
pub(crate) const DEFAULT_POSTS_TTL_SECS: u64 = 60;
pub(crate) const DEFAULT_JOBS_TTL_SECS: u64 = 120;
pub(crate) const DEFAULT_QUIZ_TTL_SECS: u64 = 300;
pub(crate) const DEFAULT_PROFILE_TTL_SECS: u64 = 30;
pub(crate) const DEFAULT_MERCURE_TOKEN_TTL_SECS: u64 = 600;

/// Page sizes whose list pages are always evicted on mutation.
pub const PRESET_LIST_LIMITS: [u32; 3] = [10, 20, 50];

/// Per-resource TTLs in seconds. Zero falls back to the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub posts_seconds: u64,
    pub jobs_seconds: u64,
    pub quiz_seconds: u64,
    pub profile_seconds: u64,
    pub mercure_token_seconds: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            posts_seconds: DEFAULT_POSTS_TTL_SECS,
            jobs_seconds: DEFAULT_JOBS_TTL_SECS,
            quiz_seconds: DEFAULT_QUIZ_TTL_SECS,
            profile_seconds: DEFAULT_PROFILE_TTL_SECS,
            mercure_token_seconds: DEFAULT_MERCURE_TOKEN_TTL_SECS,
        }
    }
}

impl TtlPolicy {
    pub fn posts(&self) -> Duration {
        seconds_or(self.posts_seconds, DEFAULT_POSTS_TTL_SECS)
    }

    pub fn jobs(&self) -> Duration {
        seconds_or(self.jobs_seconds, DEFAULT_JOBS_TTL_SECS)
    }

    pub fn quiz(&self) -> Duration {
        seconds_or(self.quiz_seconds, DEFAULT_QUIZ_TTL_SECS)
    }

    pub fn profile(&self) -> Duration {
        seconds_or(self.profile_seconds, DEFAULT_PROFILE_TTL_SECS)
    }

    pub fn mercure_token(&self) -> Duration {
        seconds_or(self.mercure_token_seconds, DEFAULT_MERCURE_TOKEN_TTL_SECS)
    }
}

/// Cache configuration resolved from the `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis connection URL; unset disables the distributed tier.
    pub redis_url: Option<String>,
    /// Upgrade `redis://` to `rediss://`.
    pub redis_tls: bool,
    /// Deployment/tenant prefix prepended to every key.
    pub key_prefix: Option<String>,
    pub redis_pool_size: usize,
    pub redis_timeout_ms: u64,
    /// Minimum gap between connection attempts after a failure; 0 retries on every call.
    pub redis_reconnect_cooldown_ms: u64,
    /// How long a stale-while-revalidate entry outlives its expiry in the store.
    pub stale_grace_seconds: u64,
    /// Maximum list keys remembered per resource for invalidation.
    pub list_key_index_limit: usize,
    /// Number of leading list pages evicted on mutation.
    pub list_eviction_pages: u32,
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_tls: false,
            key_prefix: None,
            redis_pool_size: DEFAULT_REDIS_POOL_SIZE,
            redis_timeout_ms: DEFAULT_REDIS_TIMEOUT_MS,
            redis_reconnect_cooldown_ms: DEFAULT_REDIS_RECONNECT_COOLDOWN_MS,
            stale_grace_seconds: DEFAULT_STALE_GRACE_SECS,
            list_key_index_limit: DEFAULT_LIST_KEY_INDEX_LIMIT,
            list_eviction_pages: DEFAULT_LIST_EVICTION_PAGES,
            ttl: TtlPolicy::default(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            redis_url: settings.redis_url.clone(),
            redis_tls: settings.redis_tls,
            key_prefix: settings.key_prefix.clone(),
            redis_pool_size: settings.redis_pool_size.get() as usize,
            redis_timeout_ms: settings.redis_timeout_ms.get(),
            redis_reconnect_cooldown_ms: settings.redis_reconnect_cooldown_ms,
            stale_grace_seconds: settings.stale_grace_seconds,
            list_key_index_limit: settings.list_key_index_limit.get() as usize,
            list_eviction_pages: settings.list_eviction_pages.get(),
            ttl: TtlPolicy {
                posts_seconds: settings.ttl.posts_seconds.get(),
                jobs_seconds: settings.ttl.jobs_seconds.get(),
                quiz_seconds: settings.ttl.quiz_seconds.get(),
                profile_seconds: settings.ttl.profile_seconds.get(),
                mercure_token_seconds: settings.ttl.mercure_token_seconds.get(),
            },
        }
    }
}

impl CacheConfig {
    pub fn redis_settings(&self) -> RedisSettings {
        RedisSettings {
            url: self.redis_url.clone(),
            tls: self.redis_tls,
            pool_size: self.redis_pool_size.max(1),
            timeout: Duration::from_millis(
                match self.redis_timeout_ms {
                    0 => DEFAULT_REDIS_TIMEOUT_MS,
                    ms => ms,
                },
            ),
            reconnect_cooldown: Duration::from_millis(self.redis_reconnect_cooldown_ms),
        }
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.key_prefix.clone())
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_seconds)
    }

    /// Returns the list key index limit as NonZeroUsize, clamping to 1 if zero.
    pub fn list_key_index_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.list_key_index_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

fn seconds_or(value: u64, fallback: u64) -> Duration {
    Duration::from_secs(if value == 0 { fallback } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.redis_url.is_none());
        assert!(!config.redis_tls);
        assert_eq!(config.redis_pool_size, 8);
        assert_eq!(config.redis_settings().reconnect_cooldown, Duration::ZERO);
        assert_eq!(config.stale_grace_seconds, 86_400);
        assert_eq!(config.list_key_index_limit, 256);
        assert_eq!(config.list_eviction_pages, 5);
        assert_eq!(config.ttl.posts(), Duration::from_secs(60));
        assert_eq!(config.ttl.jobs(), Duration::from_secs(120));
        assert_eq!(config.ttl.quiz(), Duration::from_secs(300));
        assert_eq!(config.ttl.profile(), Duration::from_secs(30));
        assert_eq!(config.ttl.mercure_token(), Duration::from_secs(600));
    }

    #[test]
    fn zero_ttl_falls_back_to_default() {
        let policy = TtlPolicy {
            posts_seconds: 0,
            ..Default::default()
        };
        assert_eq!(policy.posts(), Duration::from_secs(DEFAULT_POSTS_TTL_SECS));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            list_key_index_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.list_key_index_limit_non_zero().get(), 1);
    }

    #[test]
    fn redis_settings_carry_tls_flag() {
        let config = CacheConfig {
            redis_url: Some("redis://cache:6379".into()),
            redis_tls: true,
            redis_timeout_ms: 0,
            ..Default::default()
        };
        let settings = config.redis_settings();
        assert_eq!(settings.effective_url().as_deref(), Some("rediss://cache:6379"));
        assert_eq!(settings.timeout, Duration::from_millis(DEFAULT_REDIS_TIMEOUT_MS));
    }
}
