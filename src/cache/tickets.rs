//! Per-key markers for background revalidation in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Clone, Default)]
pub struct RevalidationTickets {
    inflight: Arc<DashMap<String, Arc<AtomicBool>>>,
}

impl RevalidationTickets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the ticket for `key`, or `None` if a refresh is already running.
    pub fn acquire(&self, key: &str) -> Option<RevalidationTicket> {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let revoked = Arc::new(AtomicBool::new(false));
                slot.insert(Arc::clone(&revoked));
                Some(RevalidationTicket {
                    inflight: Arc::clone(&self.inflight),
                    key: key.to_string(),
                    revoked,
                })
            }
        }
    }

    /// Mark the refresh running for `key`, if any, as outdated. Returns
    /// whether a refresh was running.
    pub fn revoke(&self, key: &str) -> bool {
        match self.inflight.get(key) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

/// Held by the refresh task; releases the key on drop, including on panic.
#[derive(Debug)]
pub struct RevalidationTicket {
    inflight: Arc<DashMap<String, Arc<AtomicBool>>>,
    key: String,
    revoked: Arc<AtomicBool>,
}

impl RevalidationTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the key was invalidated after this refresh started.
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl Drop for RevalidationTicket {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}
