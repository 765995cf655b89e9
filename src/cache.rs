//! Request cache with in-flight de-duplication.
//!
//! Each key holds one of three slots: a ready value, an in-flight fetch that
//! later callers wait on, or a failed result. Concurrent requests for the same
//! key share a single fetch: the first caller inserts an in-flight marker and
//! performs the work while holding the slot's async mutex, everyone else waits
//! on that mutex and reads the published result.
//!
//! Removing a key while its fetch is still running is allowed. The fetch
//! completes and hands its result to the callers already waiting, but it does
//! not write back into the map.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::PortalError;

type Shared<V> = Arc<futures::lock::Mutex<Option<Result<V, PortalError>>>>;
type OwnedGuard<V> = futures::lock::OwnedMutexGuard<Option<Result<V, PortalError>>>;

enum Slot<V> {
    Ready(V),
    InFlight(Shared<V>),
    Failed(PortalError),
}

/// What happens to a key whose fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The error is stored for the key and returned until the key is removed.
    Retain,
    /// The key is dropped so the next request fetches again.
    Evict,
}

/// Observable state of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inflight_hits: u64,
    pub failed_hits: u64,
    pub evictions: u64,
}

pub struct RequestCache<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
    capacity: usize,
    policy: FailurePolicy,
    stats: Mutex<CacheStats>,
}

impl<K, V> RequestCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, policy: FailurePolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            policy,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Returns the cached value for `key`, joins a running fetch for it, or
    /// runs `fetch` when neither exists. `fetch` is called at most once.
    pub async fn get_or_fetch<F, Fut>(&self, key: &K, fetch: F) -> Result<V, PortalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, PortalError>>,
    {
        enum Action<V> {
            Hit(Result<V, PortalError>),
            Wait(Shared<V>),
            Fetch(Shared<V>, Option<OwnedGuard<V>>),
        }

        let mut fetch = Some(fetch);

        loop {
            let action = {
                let mut entries = self.lock_entries();
                let mut stats = self.lock_stats();
                match entries.get(key) {
                    Some(Slot::Ready(value)) => {
                        stats.hits += 1;
                        Action::Hit(Ok(value.clone()))
                    }
                    Some(Slot::Failed(err)) => {
                        stats.failed_hits += 1;
                        Action::Hit(Err(err.clone()))
                    }
                    Some(Slot::InFlight(shared)) => {
                        stats.hits += 1;
                        stats.inflight_hits += 1;
                        debug!("joining in-flight request");
                        Action::Wait(shared.clone())
                    }
                    None => {
                        stats.misses += 1;
                        if entries.len() >= self.capacity {
                            let settled = entries
                                .iter()
                                .find(|(_, slot)| !matches!(slot, Slot::InFlight(_)))
                                .map(|(key, _)| key.clone());
                            if let Some(old) = settled {
                                entries.remove(&old);
                                stats.evictions += 1;
                            }
                        }
                        let shared: Shared<V> = Arc::new(futures::lock::Mutex::new(None));
                        // Taken before the slot becomes visible so waiters block on it.
                        let guard = shared.try_lock_owned();
                        entries.insert(key.clone(), Slot::InFlight(shared.clone()));
                        Action::Fetch(shared, guard)
                    }
                }
            };

            match action {
                Action::Hit(result) => return result,
                Action::Wait(shared) => {
                    let guard = shared.lock().await;
                    match guard.as_ref() {
                        Some(result) => return result.clone(),
                        None => {
                            // The fetching caller was dropped before publishing.
                            drop(guard);
                            let mut entries = self.lock_entries();
                            if is_same_flight(entries.get(key), &shared) {
                                entries.remove(key);
                            }
                            continue;
                        }
                    }
                }
                Action::Fetch(shared, guard) => {
                    let mut guard = match guard {
                        Some(guard) => guard,
                        None => shared.clone().lock_owned().await,
                    };
                    let Some(run) = fetch.take() else {
                        return Err(PortalError::Decode(
                            "request cache fetch already consumed".to_string(),
                        ));
                    };
                    let result = run().await;
                    *guard = Some(result.clone());
                    drop(guard);

                    let mut entries = self.lock_entries();
                    if is_same_flight(entries.get(key), &shared) {
                        match &result {
                            Ok(value) => {
                                entries.insert(key.clone(), Slot::Ready(value.clone()));
                            }
                            Err(err) => match self.policy {
                                FailurePolicy::Retain => {
                                    entries.insert(key.clone(), Slot::Failed(err.clone()));
                                }
                                FailurePolicy::Evict => {
                                    entries.remove(key);
                                }
                            },
                        }
                    }
                    return result;
                }
            }
        }
    }

    /// Ready value for `key`, without fetching.
    pub fn peek(&self, key: &K) -> Option<V> {
        match self.lock_entries().get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn status(&self, key: &K) -> Option<SlotStatus> {
        self.lock_entries().get(key).map(|slot| match slot {
            Slot::Ready(_) => SlotStatus::Ready,
            Slot::InFlight(_) => SlotStatus::Pending,
            Slot::Failed(_) => SlotStatus::Error,
        })
    }

    pub fn evict(&self, key: &K) -> bool {
        let removed = self.lock_entries().remove(key).is_some();
        if removed {
            self.lock_stats().evictions += 1;
        }
        removed
    }

    /// Keeps only the keys accepted by `keep`; returns how many were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|key, _| keep(key));
        let dropped = before - entries.len();
        if dropped > 0 {
            self.lock_stats().evictions += dropped as u64;
        }
        dropped
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        *self.lock_stats()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_stats(&self) -> MutexGuard<'_, CacheStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_same_flight<V>(slot: Option<&Slot<V>>, shared: &Shared<V>) -> bool {
    matches!(slot, Some(Slot::InFlight(current)) if Arc::ptr_eq(current, shared))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let cache: RequestCache<&str, u32> = RequestCache::new(8, FailurePolicy::Retain);
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(7)
        };

        let (a, b) = tokio::join!(cache.get_or_fetch(&"k", fetch), cache.get_or_fetch(&"k", fetch));
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().inflight_hits, 1);
        assert_eq!(cache.status(&"k"), Some(SlotStatus::Ready));
    }

    #[tokio::test]
    async fn retained_failure_is_not_refetched() {
        let cache: RequestCache<u8, u32> = RequestCache::new(8, FailurePolicy::Retain);
        let first = cache
            .get_or_fetch(&1, || async { Err(PortalError::CatalogHttp("timeout".into())) })
            .await;
        assert_matches!(first, Err(PortalError::CatalogHttp(_)));

        let second = cache.get_or_fetch(&1, || async { Ok(3) }).await;
        assert_matches!(second, Err(PortalError::CatalogHttp(_)));
        assert_eq!(cache.status(&1), Some(SlotStatus::Error));

        let other = cache.get_or_fetch(&2, || async { Ok(3) }).await;
        assert_eq!(other.unwrap(), 3);
    }

    #[tokio::test]
    async fn evicted_failure_is_fetched_again() {
        let cache: RequestCache<u8, u32> = RequestCache::new(8, FailurePolicy::Evict);
        let first = cache
            .get_or_fetch(&1, || async { Err(PortalError::DownloadHttp("reset".into())) })
            .await;
        assert!(first.is_err());
        assert_eq!(cache.status(&1), None);
        assert_eq!(cache.get_or_fetch(&1, || async { Ok(4) }).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn capacity_evicts_settled_entries() {
        let cache: RequestCache<u8, u8> = RequestCache::new(2, FailurePolicy::Retain);
        for key in 0..3u8 {
            cache.get_or_fetch(&key, move || async move { Ok(key) }).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }
}
