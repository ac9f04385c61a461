//! Remote data cache.
//!
//! One entry per [`QueryKey`], observable through a `watch` channel. Concurrent
//! requests for a key share a single in-flight fetch, previously fetched data
//! stays visible while a refetch runs, and every fetch carries a generation so
//! a superseded response can never overwrite a newer one.

pub mod key;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cookbook_shared::NetworkError;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::time::Instant;

pub use key::{QueryKey, ResourceKind};

pub type FetchResult<V> = Result<V, NetworkError>;

type SharedFetch<V> = Shared<BoxFuture<'static, FetchResult<V>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
}

/// Observable state of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<V> {
    pub status: QueryStatus,
    /// Last successful payload; kept across refetches and failures.
    pub data: Option<V>,
    /// Last failure; cleared by the next success.
    pub error: Option<NetworkError>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
    /// Generation of the fetch whose result is shown (0 before any result).
    pub generation: u64,
}

impl<V> QuerySnapshot<V> {
    pub fn pending() -> Self {
        Self {
            status: QueryStatus::Pending,
            data: None,
            error: None,
            is_fetching: false,
            is_stale: false,
            updated_at: None,
            generation: 0,
        }
    }

    /// Nothing to show yet.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending && self.data.is_none()
    }

    /// Showing earlier data while a refetch runs.
    pub fn is_refreshing(&self) -> bool {
        self.is_fetching && self.data.is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.status != QueryStatus::Pending && !self.is_fetching
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> QuerySnapshot<U> {
        self.and_then(|v| Some(f(v)))
    }

    /// Like [`QuerySnapshot::map`], dropping data `f` rejects.
    pub fn and_then<U>(self, f: impl FnOnce(V) -> Option<U>) -> QuerySnapshot<U> {
        QuerySnapshot {
            status: self.status,
            data: self.data.and_then(f),
            error: self.error,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            updated_at: self.updated_at,
            generation: self.generation,
        }
    }
}

/// Retry policy for retryable fetch failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = never retry)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(u64::from((delay as u32).min(self.max_delay_ms)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryConfig {
    /// Age after which successful data is refetched on the next read.
    pub stale_after: Option<Duration>,
    pub retry: RetryConfig,
}

struct Entry<V> {
    tx: watch::Sender<QuerySnapshot<V>>,
    /// Latest dispatched generation; only its result is applied.
    generation: u64,
    in_flight: Option<(u64, SharedFetch<V>)>,
    fetched_at: Option<Instant>,
    invalidated: bool,
}

impl<V> Entry<V> {
    fn new() -> Self {
        let (tx, _) = watch::channel(QuerySnapshot::pending());
        Self {
            tx,
            generation: 0,
            in_flight: None,
            fetched_at: None,
            invalidated: false,
        }
    }
}

struct Registry<V> {
    entries: HashMap<QueryKey, Entry<V>>,
    /// Shared by all keys and never reset, so a fetch outliving a `remove`
    /// or `clear` cannot match a recreated entry.
    next_generation: u64,
}

struct Inner<V> {
    registry: Mutex<Registry<V>>,
    config: QueryConfig,
}

impl<V: Clone> Inner<V> {
    fn lock(&self) -> MutexGuard<'_, Registry<V>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, entry: &Entry<V>) -> bool {
        if entry.invalidated {
            return true;
        }
        match (self.config.stale_after, entry.fetched_at) {
            (Some(max_age), Some(at)) => at.elapsed() >= max_age,
            _ => false,
        }
    }

    fn needs_fetch(&self, entry: &Entry<V>) -> bool {
        entry.in_flight.is_none()
            && (entry.tx.borrow().status != QueryStatus::Success || self.is_stale(entry))
    }

    fn settle(&self, key: &QueryKey, generation: u64, result: &FetchResult<V>) {
        let mut registry = self.lock();
        let Some(entry) = registry.entries.get_mut(key) else {
            tracing::debug!(%key, generation, "entry removed, dropping fetch result");
            return;
        };

        if matches!(entry.in_flight, Some((g, _)) if g == generation) {
            entry.in_flight = None;
        }
        if entry.generation != generation {
            tracing::debug!(
                %key,
                generation,
                latest = entry.generation,
                "discarding superseded fetch result"
            );
            return;
        }

        match result {
            Ok(data) => {
                entry.fetched_at = Some(Instant::now());
                entry.invalidated = false;
                entry.tx.send_modify(|s| {
                    s.status = QueryStatus::Success;
                    s.data = Some(data.clone());
                    s.error = None;
                    s.is_fetching = false;
                    s.is_stale = false;
                    s.updated_at = Some(Utc::now());
                    s.generation = generation;
                });
            }
            Err(error) => {
                tracing::debug!(%key, generation, "fetch failed: {error}");
                entry.tx.send_modify(|s| {
                    s.status = QueryStatus::Error;
                    s.error = Some(error.clone());
                    s.is_fetching = false;
                    s.generation = generation;
                });
            }
        }
    }
}

/// Keyed stale-while-revalidate cache. Clones share the same entries.
///
/// Fetches are spawned on the current Tokio runtime, so every method that may
/// start one must be called from within a runtime.
pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    entries: HashMap::new(),
                    next_generation: 0,
                }),
                config,
            }),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// Observe `key`, starting a fetch if the entry is missing, failed or stale
    /// and none is already running.
    pub fn query<F, Fut>(&self, key: QueryKey, fetcher: F) -> watch::Receiver<QuerySnapshot<V>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let mut registry = self.inner.lock();
        let entry = registry.entries.entry(key.clone()).or_insert_with(Entry::new);
        let rx = entry.tx.subscribe();
        if self.inner.needs_fetch(entry) {
            let _ = self.dispatch(&mut registry, &key, fetcher);
        }
        rx
    }

    /// Resolve `key`: joins a running fetch, returns fresh cached data, or
    /// starts a new fetch and waits for it.
    pub async fn fetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> FetchResult<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let pending = {
            let mut registry = self.inner.lock();
            let entry = registry.entries.entry(key.clone()).or_insert_with(Entry::new);
            if let Some((_, running)) = &entry.in_flight {
                running.clone()
            } else if self.inner.needs_fetch(entry) {
                self.dispatch(&mut registry, &key, fetcher)
            } else {
                let cached = entry.tx.borrow().data.clone();
                match cached {
                    Some(data) => return Ok(data),
                    None => self.dispatch(&mut registry, &key, fetcher),
                }
            }
        };
        pending.await
    }

    /// Start a new fetch for `key` even if one is running; the newest
    /// dispatch wins.
    pub async fn refresh<F, Fut>(&self, key: QueryKey, fetcher: F) -> FetchResult<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let pending = {
            let mut registry = self.inner.lock();
            self.dispatch(&mut registry, &key, fetcher)
        };
        pending.await
    }

    /// Mark `key` stale. Data stays visible; the next read refetches.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let mut registry = self.inner.lock();
        match registry.entries.get_mut(key) {
            Some(entry) => {
                mark_stale(entry);
                true
            }
            None => false,
        }
    }

    /// Mark every entry of `resource` stale.
    pub fn invalidate_resource(&self, resource: ResourceKind) -> usize {
        let mut registry = self.inner.lock();
        let mut count = 0;
        for (_, entry) in registry
            .entries
            .iter_mut()
            .filter(|(key, _)| key.resource == resource)
        {
            mark_stale(entry);
            count += 1;
        }
        count
    }

    /// Drop the entry. Outstanding fetches for it are discarded on arrival.
    pub fn remove(&self, key: &QueryKey) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut registry = self.inner.lock();
        let count = registry.entries.len();
        registry.entries.clear();
        tracing::debug!(count, "query cache cleared");
    }

    pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot<V>> {
        let registry = self.inner.lock();
        registry.entries.get(key).map(|entry| {
            let mut snapshot = entry.tx.borrow().clone();
            snapshot.is_stale = self.inner.is_stale(entry);
            snapshot
        })
    }

    /// Observe `key` without fetching.
    pub fn subscribe(&self, key: QueryKey) -> watch::Receiver<QuerySnapshot<V>> {
        let mut registry = self.inner.lock();
        registry
            .entries
            .entry(key)
            .or_insert_with(Entry::new)
            .tx
            .subscribe()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatch<F, Fut>(
        &self,
        registry: &mut Registry<V>,
        key: &QueryKey,
        fetcher: F,
    ) -> SharedFetch<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        registry.next_generation += 1;
        let generation = registry.next_generation;

        let weak: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        let retry = self.inner.config.retry.clone();
        let task_key = key.clone();
        let fetch = async move {
            let result = fetch_with_retry(&retry, &task_key, &fetcher).await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(&task_key, generation, &result);
            }
            result
        }
        .boxed()
        .shared();

        let entry = registry.entries.entry(key.clone()).or_insert_with(Entry::new);
        entry.generation = generation;
        entry.in_flight = Some((generation, fetch.clone()));
        entry.tx.send_modify(|s| {
            s.status = QueryStatus::Pending;
            s.is_fetching = true;
        });
        tracing::debug!(%key, generation, "fetch dispatched");

        // Runs to completion even if every caller stops waiting.
        tokio::spawn(fetch.clone());
        fetch
    }
}

fn mark_stale<V>(entry: &mut Entry<V>) {
    entry.invalidated = true;
    entry.tx.send_modify(|s| s.is_stale = true);
}

async fn fetch_with_retry<V, F, Fut>(retry: &RetryConfig, key: &QueryKey, fetcher: &F) -> FetchResult<V>
where
    F: Fn() -> Fut,
    Fut: Future<Output = FetchResult<V>>,
{
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Err(error) if error.is_retryable() && attempt < retry.max_attempts => {
                let delay = retry.delay_for_attempt(attempt);
                attempt += 1;
                tracing::warn!(
                    %key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying fetch: {error}"
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl Fn() -> BoxFuture<'static, FetchResult<String>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value.to_string()) }.boxed()
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(retry.delay_for_attempt(20), Duration::from_millis(30000));
    }

    #[test]
    fn loading_and_refreshing_flags() {
        let mut snapshot = QuerySnapshot::<u8>::pending();
        assert!(snapshot.is_loading());
        snapshot.data = Some(1);
        snapshot.is_fetching = true;
        assert!(!snapshot.is_loading());
        assert!(snapshot.is_refreshing());
        assert!(!snapshot.is_settled());
    }

    #[tokio::test]
    async fn fresh_data_is_served_from_cache() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.fetch(QueryKey::cookbooks(), counting(&calls, "a")).await;
        let second = cache.fetch(QueryKey::cookbooks(), counting(&calls, "b")).await;

        assert_eq!(first.unwrap(), "a");
        assert_eq!(second.unwrap(), "a");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_refetches_on_next_read() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::recipe("1");

        cache.fetch(key.clone(), counting(&calls, "old")).await.unwrap();
        assert!(cache.invalidate(&key));

        let snapshot = cache.snapshot(&key).unwrap();
        assert!(snapshot.is_stale);
        assert_eq!(snapshot.data.as_deref(), Some("old"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let value = cache.fetch(key.clone(), counting(&calls, "new")).await.unwrap();
        assert_eq!(value, "new");
        assert!(!cache.snapshot(&key).unwrap().is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_resource_touches_only_that_kind() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.fetch(QueryKey::recipe("1"), counting(&calls, "r1")).await.unwrap();
        cache.fetch(QueryKey::recipes_by_cookbook("2"), counting(&calls, "rs")).await.unwrap();
        cache.fetch(QueryKey::cookbooks(), counting(&calls, "cs")).await.unwrap();

        assert_eq!(cache.invalidate_resource(ResourceKind::Recipe), 2);
        assert!(cache.snapshot(&QueryKey::recipe("1")).unwrap().is_stale);
        assert!(!cache.snapshot(&QueryKey::cookbooks()).unwrap().is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_after_expires_entries() {
        let cache = QueryCache::new(QueryConfig {
            stale_after: Some(Duration::from_secs(60)),
            ..QueryConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::users();

        cache.fetch(key.clone(), counting(&calls, "v1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.fetch(key.clone(), counting(&calls, "v2")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.snapshot(&key).unwrap().is_stale);
        let value = cache.fetch(key, counting(&calls, "v3")).await.unwrap();
        assert_eq!(value, "v3");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remove_and_clear_drop_entries() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.fetch(QueryKey::users(), counting(&calls, "u")).await.unwrap();
        cache.fetch(QueryKey::ingredients(), counting(&calls, "i")).await.unwrap();

        assert!(cache.remove(&QueryKey::users()));
        assert!(!cache.remove(&QueryKey::users()));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.snapshot(&QueryKey::ingredients()).is_none());
    }
}
