use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::error::{BriefError, Result};

type AnyValue = Arc<dyn Any + Send + Sync>;
type FetchResult = std::result::Result<AnyValue, BriefError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// A cached value. Entries are never mutated: a refresh or a recorded failure
/// replaces the whole `Arc`, so readers always see a consistent entry.
///
/// A failed fetch also leaves an entry behind: it keeps the last good value
/// (if any) and holds the error for one TTL, so a broken source is not
/// retried on every read.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Option<T>,
    /// When `value` was fetched; `None` until a fetch has succeeded.
    pub fetched_at: Option<DateTime<Utc>>,
    pub ttl: Duration,
    pub last_error: Option<BriefError>,
    expires_at: Instant,
}

impl<T: Clone> CacheEntry<T> {
    fn fresh(value: T, ttl: Duration) -> Self {
        Self {
            value: Some(value),
            fetched_at: Some(Utc::now()),
            ttl,
            last_error: None,
            expires_at: Instant::now() + ttl,
        }
    }

    fn failed(previous: Option<&Self>, error: BriefError, ttl: Duration) -> Self {
        Self {
            value: previous.and_then(|p| p.value.clone()),
            fetched_at: previous.and_then(|p| p.fetched_at),
            ttl,
            last_error: Some(error),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOrigin {
    /// Served from memory without I/O.
    Cached,
    /// A fetch ran (or was joined) for this call.
    Fetched,
}

/// Outcome of [`CacheManager::get_or_fetch`].
///
/// | value | error | stale | meaning |
/// |---|---|---|---|
/// | Some | None | false | fresh hit or successful fetch |
/// | Some | Some | true | fetch failed, last-known-good returned |
/// | None | Some | false | fetch failed, nothing cached |
#[derive(Debug, Clone)]
pub struct CacheLookup<T> {
    pub value: Option<T>,
    pub error: Option<BriefError>,
    pub stale: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub origin: LookupOrigin,
}

struct InFlight {
    id: u64,
    future: SharedFetch,
}

#[derive(Default)]
struct Slot {
    entry: Option<Arc<CacheEntry<AnyValue>>>,
    in_flight: Option<InFlight>,
}

#[derive(Default)]
struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    next_flight: AtomicU64,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // Slot updates are single assignments, so a poisoned map is still consistent.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a finished fetch unless it was cleared or superseded meanwhile.
    /// `on_store` runs under the slot lock, only when a value is stored, so a
    /// concurrent `clear` either sees its side effects or prevents them.
    fn complete<S>(&self, key: &str, flight_id: u64, ttl: Duration, result: &FetchResult, on_store: S)
    where
        S: FnOnce(&AnyValue),
    {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(key) else {
            log::debug!("Discarding fetch result for cleared cache key '{}'", key);
            return;
        };
        if slot.in_flight.as_ref().map(|f| f.id) != Some(flight_id) {
            log::debug!("Discarding superseded fetch result for '{}'", key);
            return;
        }
        slot.in_flight = None;

        match result {
            Ok(value) => {
                slot.entry = Some(Arc::new(CacheEntry::fresh(value.clone(), ttl)));
                on_store(value);
            }
            Err(err) => {
                log::warn!("Fetch for '{}' failed: {}", key, err);
                let entry = CacheEntry::failed(slot.entry.as_deref(), err.clone(), ttl);
                slot.entry = Some(Arc::new(entry));
            }
        }
    }
}

/// Serves a fresh entry without I/O. `None` means the caller has to fetch.
fn cached_lookup<T: Clone + 'static>(entry: &CacheEntry<AnyValue>) -> Option<CacheLookup<T>> {
    if !entry.is_fresh() {
        return None;
    }
    let value = match &entry.value {
        Some(value) => Some(value.downcast_ref::<T>()?.clone()),
        None => None,
    };
    Some(CacheLookup {
        stale: value.is_some() && entry.last_error.is_some(),
        value,
        error: entry.last_error.clone(),
        fetched_at: entry.fetched_at,
        origin: LookupOrigin::Cached,
    })
}

/// Process-wide TTL cache with single-flight fetch coalescing and
/// stale-on-error fallback. Cheap to clone; clones share the same store.
#[derive(Clone, Default)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, fetching it when missing, expired or
    /// `force`d. Concurrent callers for one key share a single fetch.
    ///
    /// The fetch runs on its own task: a caller that stops waiting (timeout,
    /// dropped request) does not cancel it, and its result still lands in the
    /// cache.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        force: bool,
        fetch: F,
    ) -> CacheLookup<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.get_or_fetch_with(key, ttl, force, fetch, |_: &T| {}).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), calling `on_store` with a
    /// fetched value once it is actually kept. A fetch finishing after
    /// `clear`/`invalidate_prefix` dropped its key never calls it.
    pub async fn get_or_fetch_with<T, F, Fut, S>(
        &self,
        key: &str,
        ttl: Duration,
        force: bool,
        fetch: F,
        on_store: S,
    ) -> CacheLookup<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        S: FnOnce(&T) + Send + 'static,
    {
        let flight = {
            let mut slots = self.inner.slots();
            let slot = slots.entry(key.to_string()).or_default();

            if !force {
                if let Some(lookup) = slot.entry.as_deref().and_then(cached_lookup::<T>) {
                    return lookup;
                }
            }

            match &slot.in_flight {
                Some(in_flight) => {
                    log::debug!("Joining in-flight fetch for '{}'", key);
                    in_flight.future.clone()
                }
                None => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let future = self.spawn_fetch(key, id, ttl, fetch(), on_store);
                    slot.in_flight = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        match flight.await {
            Ok(value) => match value.downcast_ref::<T>() {
                Some(value) => CacheLookup {
                    value: Some(value.clone()),
                    error: None,
                    stale: false,
                    fetched_at: self.entry(key).and_then(|e| e.fetched_at),
                    origin: LookupOrigin::Fetched,
                },
                None => CacheLookup {
                    value: None,
                    error: Some(BriefError::Config(format!(
                        "cache key '{}' holds a different value type",
                        key
                    ))),
                    stale: false,
                    fetched_at: None,
                    origin: LookupOrigin::Fetched,
                },
            },
            Err(err) => {
                let previous = self.peek::<T>(key);
                CacheLookup {
                    stale: previous.is_some(),
                    fetched_at: previous.as_ref().map(|(_, at)| *at),
                    value: previous.map(|(value, _)| value),
                    error: Some(err),
                    origin: LookupOrigin::Fetched,
                }
            }
        }
    }

    fn spawn_fetch<T, Fut, S>(
        &self,
        key: &str,
        flight_id: u64,
        ttl: Duration,
        fetch: Fut,
        on_store: S,
    ) -> SharedFetch
    where
        T: Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        S: FnOnce(&T) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        let handle = tokio::spawn(async move {
            let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result.map(|value| Arc::new(value) as AnyValue),
                Err(_) => Err(BriefError::Network(format!(
                    "fetch for '{}' panicked",
                    task_key
                ))),
            };
            inner.complete(&task_key, flight_id, ttl, &result, |value| {
                if let Some(value) = value.downcast_ref::<T>() {
                    on_store(value);
                }
            });
            result
        });

        let inner = Arc::clone(&self.inner);
        let wait_key = key.to_string();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    let result: FetchResult = Err(BriefError::Network(format!(
                        "fetch task for '{}' stopped: {}",
                        wait_key, join_err
                    )));
                    inner.complete(&wait_key, flight_id, ttl, &result, |_| {});
                    result
                }
            }
        }
        .boxed()
        .shared()
    }

    fn entry(&self, key: &str) -> Option<Arc<CacheEntry<AnyValue>>> {
        self.inner.slots().get(key).and_then(|slot| slot.entry.clone())
    }

    /// Current value for `key` regardless of freshness, with its fetch time.
    pub fn peek<T: Clone + 'static>(&self, key: &str) -> Option<(T, DateTime<Utc>)> {
        let entry = self.entry(key)?;
        let value = entry.value.as_ref()?.downcast_ref::<T>()?.clone();
        Some((value, entry.fetched_at?))
    }

    pub fn last_error(&self, key: &str) -> Option<BriefError> {
        self.entry(key).and_then(|e| e.last_error.clone())
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner
            .slots()
            .get(key)
            .map(|slot| slot.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Installs a value fetched earlier (e.g. restored from disk), keeping its
    /// age so it expires when it would have originally.
    pub fn seed<T: Send + Sync + 'static>(
        &self,
        key: &str,
        value: T,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
    ) {
        let age = (Utc::now() - fetched_at).to_std().unwrap_or_default();
        let remaining = ttl.saturating_sub(age);
        let entry = CacheEntry {
            value: Some(Arc::new(value) as AnyValue),
            fetched_at: Some(fetched_at),
            ttl,
            last_error: None,
            expires_at: Instant::now() + remaining,
        };
        let mut slots = self.inner.slots();
        let slot = slots.entry(key.to_string()).or_default();
        if slot.entry.is_none() {
            slot.entry = Some(Arc::new(entry));
        }
    }

    /// Most recent successful fetch time among keys starting with `prefix`.
    pub fn last_fetch(&self, prefix: &str) -> Option<DateTime<Utc>> {
        self.inner
            .slots()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter_map(|(_, slot)| slot.entry.as_ref().and_then(|e| e.fetched_at))
            .max()
    }

    /// Drops entries (and in-flight bookkeeping) for keys starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut slots = self.inner.slots();
        let before = slots.len();
        slots.retain(|key, _| !key.starts_with(prefix));
        let removed = before - slots.len();
        if removed > 0 {
            log::debug!("Invalidated {} cache key(s) under '{}'", removed, prefix);
        }
        removed
    }

    /// Removes everything. Fetches still running finish but are not stored.
    pub fn clear(&self) {
        let mut slots = self.inner.slots();
        let count = slots.len();
        slots.clear();
        log::info!("Cache cleared ({} key(s))", count);
    }

    pub fn len(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
