use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use common::protocol::Domain;
use tokio::sync::OwnedMutexGuard;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::gateway::{ParamSet, Payload};

/// Cache key: `<domain>_<canonical params>`, e.g. `headlines_{"country":"us"}`.
pub fn cache_key(domain: Domain, params: &ParamSet) -> String {
    format!("{}_{}", domain.as_str(), params.canonical())
}

struct CacheEntry {
    payload: Payload,
    inserted_at: Instant,
}

/// Process-wide TTL cache of upstream payloads, shared by every connection.
///
/// Entries are served while younger than the TTL and evicted the first time
/// they are read after that. `lock_key` lets a caller hold exclusive fetch
/// rights for one key so concurrent misses do not all go upstream.
pub struct CacheStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Payload> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => return Some(entry.payload.clone()),
            Some(_) => {}
            None => return None,
        }
        debug!(key, "cache entry expired");
        entries.remove(key);
        None
    }

    pub fn set(&self, key: impl Into<String>, payload: Payload) {
        lock(&self.entries).insert(
            key.into(),
            CacheEntry {
                payload,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for exclusive fetch rights on `key`.
    pub async fn lock_key(&self, key: &str) -> FetchGuard<'_> {
        let slot = lock(&self.inflight)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = slot.lock_owned().await;
        FetchGuard {
            store: self,
            key: key.to_string(),
            _guard: guard,
        }
    }
}

/// Held while one caller fetches a key; dropping it lets the next waiter in.
pub struct FetchGuard<'a> {
    store: &'a CacheStore,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = lock(&self.store.inflight);
        // Only the map and this guard hold the slot: nobody is waiting.
        if inflight.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) <= 2) {
            inflight.remove(&self.key);
        }
    }
}

// A panic while holding the lock cannot leave a half-written entry behind,
// so a poisoned map is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
