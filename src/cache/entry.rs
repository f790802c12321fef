//! Cache entries and the clock used to judge their freshness.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        i64::try_from(nanos).unwrap_or(i64::MAX)
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A cached value with the timestamps that govern its lifecycle.
///
/// Fresh while `now < expires_at`; stale afterwards, at which point it is
/// still served by stale-while-revalidate reads until the store evicts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: i64,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revalidated_at: Option<i64>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, now: i64, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: now,
            expires_at: now.saturating_add(duration_millis(ttl)),
            revalidated_at: None,
        }
    }

    /// Mark the entry as produced by a background revalidation.
    pub fn revalidated(mut self) -> Self {
        self.revalidated_at = Some(self.cached_at);
        self
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
