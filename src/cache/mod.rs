//! Stale-while-revalidate cache with request coalescing
//!
//! Each entry carries the instant it was stored. Relative to that instant an
//! entry is:
//! - **fresh** while younger than `fresh_for`: served, no fetch
//! - **stale** between `fresh_for` and `gc_after`: served immediately, and a
//!   background refresh is started
//! - **gone** after `gc_after`: treated as a miss and swept on the next write
//!
//! A miss triggers exactly one fetch per key. Concurrent callers for the
//! same key await the same shared in-flight future instead of issuing their
//! own. Failed fetches are handed to every waiter but never cached.
//!
//! Reads take a shared lock, so readers never block each other. Neither lock
//! is held across an `.await`.

pub mod backoff;

pub use backoff::{ExponentialBackoff, MaxRetriesExceeded};

use crate::error::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type InFlight<V> = Shared<BoxFuture<'static, Result<V>>>;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Outcome of a cache read that performs no fetching
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Fresh(V),
    Stale(V),
    Missing,
}

pub struct SwrCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<K, InFlight<V>>>,
    fresh_for: Duration,
    gc_after: Duration,
}

impl<K, V> SwrCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(fresh_for: Duration, gc_after: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            fresh_for,
            gc_after: gc_after.max(fresh_for),
        }
    }

    /// Classify the entry for `key` without fetching
    pub fn peek(&self, key: &K) -> Lookup<V> {
        let now = Instant::now();
        let entries = self.entries.read();

        match entries.get(key) {
            Some(entry) => {
                let age = now.saturating_duration_since(entry.stored_at);
                if age < self.fresh_for {
                    Lookup::Fresh(entry.value.clone())
                } else if age < self.gc_after {
                    Lookup::Stale(entry.value.clone())
                } else {
                    Lookup::Missing
                }
            }
            None => Lookup::Missing,
        }
    }

    /// Store `value` under `key`, sweeping entries past the gc horizon
    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let gc_after = self.gc_after;
        entries.retain(|_, e| now.saturating_duration_since(e.stored_at) < gc_after);
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop every entry whose key matches `pred`
    pub fn invalidate_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !pred(k));
        before - entries.len()
    }

    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serve from cache, refreshing stale entries in the background and
    /// fetching (coalesced) on a miss
    pub async fn get_or_fetch<F, Fut>(self: &Arc<Self>, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.peek(&key) {
            Lookup::Fresh(value) => Ok(value),
            Lookup::Stale(value) => {
                self.refresh_in_background(key, fetch);
                Ok(value)
            }
            Lookup::Missing => self.fetch_coalesced(key, fetch).await,
        }
    }

    /// Like `get_or_fetch`, but never serves stale values
    pub async fn get_fresh_or_fetch<F, Fut>(self: &Arc<Self>, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.peek(&key) {
            Lookup::Fresh(value) => Ok(value),
            _ => self.fetch_coalesced(key, fetch).await,
        }
    }

    /// Run `fetch` unless a fetch for `key` is already in flight, in which
    /// case join it
    pub async fn fetch_coalesced<F, Fut>(self: &Arc<Self>, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock();

            if let Some(existing) = in_flight.get(&key) {
                existing.clone()
            } else {
                // A fetch may have completed between the caller's peek and
                // taking this lock
                if let Lookup::Fresh(value) = self.peek(&key) {
                    return Ok(value);
                }

                let cache = Arc::clone(self);
                let fetch_key = key.clone();
                let fut = fetch();
                let shared = async move {
                    let result = fut.await;
                    if let Ok(value) = &result {
                        cache.insert(fetch_key.clone(), value.clone());
                    }
                    cache.in_flight.lock().remove(&fetch_key);
                    result
                }
                .boxed()
                .shared();

                in_flight.insert(key, shared.clone());
                shared
            }
        };

        shared.await
    }

    fn refresh_in_background<F, Fut>(self: &Arc<Self>, key: K, fetch: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if self.in_flight.lock().contains_key(&key) {
            return;
        }

        let cache = Arc::clone(self);
        let fut = fetch();
        tokio::spawn(async move {
            if let Err(e) = cache.fetch_coalesced(key.clone(), move || fut).await {
                log::debug!("🔁 Background refresh failed for {:?}: {}", key, e);
            }
        });
    }
}
