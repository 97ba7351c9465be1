use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::snippet::source::FetchError;

/// Capacity used by viewers for per-cell snippets.
pub const DEFAULT_SNIPPET_CAPACITY: usize = 25_000;

/// Capacity-bounded least-recently-used map.
///
/// Not thread-safe on its own; [`SnippetCache`] wraps it in a mutex.
#[derive(Debug)]
pub struct LruStore<K: Hash + Eq, V> {
    cache: LruCache<K, V>,
}

impl<K: Hash + Eq, V> LruStore<K, V> {
    /// A zero capacity is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.cache.get(key)
    }

    /// Look up without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.cache.peek(key)
    }

    /// Insert, returning the entry evicted to make room, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        match self.cache.push(key, value) {
            // `push` also reports a replaced value under the same key.
            Some((old_key, _)) if self.cache.contains(&old_key) => None,
            evicted => evicted,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// How a caller takes part in a load.
pub enum Join<V> {
    /// First caller for the key: runs the loader.
    Leader,
    /// A load is already running; wait for its outcome.
    Follower(oneshot::Receiver<Result<V, FetchError>>),
}

/// Outstanding loads, keyed like the store.
#[derive(Debug)]
pub struct InFlightRegistry<K, V> {
    pending: HashMap<K, Vec<oneshot::Sender<Result<V, FetchError>>>>,
}

impl<K: Hash + Eq, V: Clone> InFlightRegistry<K, V> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    pub fn join(&mut self, key: K) -> Join<V> {
        match self.pending.get_mut(&key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Join::Follower(rx)
            }
            None => {
                self.pending.insert(key, Vec::new());
                Join::Leader
            }
        }
    }

    /// Deliver the outcome to every follower and forget the key. Returns the
    /// number of followers notified.
    pub fn complete(&mut self, key: &K, result: &Result<V, FetchError>) -> usize {
        let waiters = self.pending.remove(key).unwrap_or_default();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        count
    }

    /// Forget the key without a result; followers observe a closed channel.
    pub fn abandon(&mut self, key: &K) {
        self.pending.remove(key);
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K: Hash + Eq, V: Clone> Default for InFlightRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader invocations.
    pub loads: u64,
    pub len: usize,
}

/// LRU cache with a memoized asynchronous miss path.
///
/// Concurrent [`SnippetCache::fetch`] calls for the same key share a single
/// loader invocation. Failures reach every waiter and are never cached.
pub struct SnippetCache<K: Hash + Eq, V> {
    store: Mutex<LruStore<K, V>>,
    in_flight: Mutex<InFlightRegistry<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
}

impl<K, V> SnippetCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            store: Mutex::new(LruStore::new(capacity)),
            in_flight: Mutex::new(InFlightRegistry::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_SNIPPET_CAPACITY)
    }

    /// Cached value, if any. Never triggers a load.
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.store.lock().get(key).cloned();
        self.record(value.is_some());
        value
    }

    pub fn contains(&self, key: &K) -> bool {
        self.store.lock().peek(key).is_some()
    }

    pub fn insert(&self, key: K, value: V) {
        if self.store.lock().put(key, value).is_some() {
            trace!("snippet cache evicted least recently used entry");
        }
    }

    pub fn is_loading(&self, key: &K) -> bool {
        self.in_flight.lock().is_pending(key)
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.store.lock().capacity()
    }

    pub fn clear(&self) {
        self.store.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            len: self.len(),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Cached value, or the result of `loader` on a miss.
    ///
    /// While a load for `key` is running, further calls wait for it instead of
    /// invoking their own loader.
    pub async fn fetch<F, Fut>(&self, key: K, loader: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        let join = {
            // Registry first, then store: a leader always fills the store
            // before leaving the registry, so nothing slips in between.
            let mut in_flight = self.in_flight.lock();
            let cached = self.store.lock().get(&key).cloned();
            self.record(cached.is_some());
            if let Some(value) = cached {
                trace!("snippet cache hit");
                return Ok(value);
            }
            in_flight.join(key.clone())
        };

        match join {
            Join::Follower(rx) => {
                trace!("joining in-flight load");
                rx.await.unwrap_or(Err(FetchError::Abandoned))
            }
            Join::Leader => {
                self.loads.fetch_add(1, Ordering::Relaxed);
                let guard = LeaderGuard {
                    cache: self,
                    key: Some(key),
                };
                let result = loader().await;
                guard.finish(&result);
                result
            }
        }
    }
}

/// Clears the registry entry if the leading future is dropped mid-load.
struct LeaderGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    cache: &'a SnippetCache<K, V>,
    key: Option<K>,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn finish(mut self, result: &Result<V, FetchError>) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Ok(value) = result {
            self.cache.store.lock().put(key.clone(), value.clone());
        }
        let notified = self.cache.in_flight.lock().complete(&key, result);
        trace!(notified, ok = result.is_ok(), "in-flight load finished");
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.in_flight.lock().abandon(&key);
        }
    }
}
