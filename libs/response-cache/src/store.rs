//! Bounded TTL store for backend responses.
//!
//! Expiry is lazy: a stale entry is dropped when it is read, never swept
//! in the background. Capacity is enforced on insert by evicting the
//! least-recently-accessed entry (the capacity bound is the contract; LRU
//! is the implementation choice).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// A cached backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

struct Entry {
    value: CachedResponse,
    expires_at: Instant,
    last_accessed: Instant,
}

pub(crate) struct Store {
    capacity: usize,
    entries: RwLock<HashMap<String, Entry>>,
}

impl Store {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A fresh entry; `None` once `now >= expires_at`.
    pub(crate) async fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.last_accessed = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(key = %key, "dropped expired cache entry");
                None
            }
            None => None,
        }
    }

    pub(crate) async fn set(&self, key: &str, value: CachedResponse, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );

        if entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                debug!(key = %oldest, "evicted cache entry over capacity");
            }
        }
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
