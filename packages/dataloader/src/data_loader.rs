//! Per-request batching and caching front end for a batch loader
//!
//! Keys requested through [`DataLoader::load`] are queued until the loader
//! is dispatched, either directly or by its [`DataLoaderRegistry`]. A
//! dispatch hands the queued keys to the batch loader in one call (split by
//! `max_batch_size`) and resolves every waiting caller from the result.
//!
//! Batches are started synchronously inside `dispatch`, so the loader and
//! any instrumentation hooks are entered on the dispatching thread. When a
//! Tokio runtime is available the rest of the batch runs as a spawned task;
//! otherwise it runs when the future returned by `dispatch` is awaited.
//!
//! [`DataLoaderRegistry`]: crate::DataLoaderRegistry

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dgs_shared_config::DataLoaderConfig;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::environment::{BatchLoaderEnvironment, ContextValue};
use crate::error::{DataLoaderError, DataLoaderResult};
use crate::loader::{AnyBatchLoader, BatchLoader, LoaderKey, LoaderShape, LoaderValue};
use crate::registry::DataLoaderRegistryConsumer;
use crate::statistics::{Statistics, StatisticsCollector};

/// Pending result of a single key
pub type LoadFuture<V> = BoxFuture<'static, DataLoaderResult<V>>;

/// Batching and caching behavior of a data loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLoaderOptions {
    /// Queue keys until dispatch; when disabled every load is its own batch
    pub batching_enabled: bool,
    /// Share results between loads of the same key
    pub caching_enabled: bool,
    /// Split dispatches into batches of at most this many keys
    pub max_batch_size: Option<usize>,
}

impl DataLoaderOptions {
    pub fn from_config(config: &DataLoaderConfig) -> Self {
        Self {
            batching_enabled: config.batching_enabled,
            caching_enabled: config.caching_enabled,
            max_batch_size: config.max_batch_size(),
        }
    }

    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.batching_enabled = enabled;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    /// Limit batch size; 0 removes the limit
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = (max_batch_size > 0).then_some(max_batch_size);
        self
    }
}

impl Default for DataLoaderOptions {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            caching_enabled: true,
            max_batch_size: None,
        }
    }
}

struct Pending<K, V> {
    key: K,
    key_context: Option<ContextValue>,
    sender: oneshot::Sender<DataLoaderResult<V>>,
}

struct LoaderState<K, V> {
    queue: Vec<Pending<K, V>>,
    cache: HashMap<K, Shared<LoadFuture<V>>>,
    last_dispatch: Instant,
}

struct Inner<K: LoaderKey, V: LoaderValue> {
    name: Arc<str>,
    loader: AnyBatchLoader<K, V>,
    options: DataLoaderOptions,
    context: Option<ContextValue>,
    state: Mutex<LoaderState<K, V>>,
    stats: StatisticsCollector,
}

impl<K: LoaderKey, V: LoaderValue> Inner<K, V> {
    fn lock_state(&self) -> MutexGuard<'_, LoaderState<K, V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Batching, caching handle over one batch loader
///
/// Cloning is cheap and every clone shares the same queue and cache.
pub struct DataLoader<K: LoaderKey, V: LoaderValue> {
    inner: Arc<Inner<K, V>>,
}

impl<K: LoaderKey, V: LoaderValue> DataLoader<K, V> {
    /// Create a loader with default options
    pub fn new<L>(name: impl Into<Arc<str>>, loader: L) -> Self
    where
        L: BatchLoader<K, V>,
    {
        Self::from_any(
            name,
            AnyBatchLoader::new(loader),
            DataLoaderOptions::default(),
            None,
        )
    }

    /// Create a loader from an already erased batch loader
    pub fn from_any(
        name: impl Into<Arc<str>>,
        loader: AnyBatchLoader<K, V>,
        options: DataLoaderOptions,
        context: Option<ContextValue>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                loader,
                options,
                context,
                state: Mutex::new(LoaderState {
                    queue: Vec::new(),
                    cache: HashMap::new(),
                    last_dispatch: Instant::now(),
                }),
                stats: StatisticsCollector::default(),
            }),
        }
    }

    pub fn with_options(self, options: DataLoaderOptions) -> Self {
        let inner = &self.inner;
        Self::from_any(
            Arc::clone(&inner.name),
            inner.loader.clone(),
            options,
            inner.context.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> DataLoaderOptions {
        self.inner.options
    }

    pub fn shape(&self) -> LoaderShape {
        self.inner.loader.shape()
    }

    pub fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer> {
        self.inner.loader.registry_consumer()
    }

    /// Whether both handles share the same queue and cache
    pub fn ptr_eq(&self, other: &DataLoader<K, V>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Request the value for `key`
    pub fn load(&self, key: K) -> LoadFuture<V> {
        self.enqueue(key, None)
    }

    /// Request the value for `key`, passing a context the batch loader
    /// receives alongside it in the environment
    pub fn load_with_context<C>(&self, key: K, key_context: C) -> LoadFuture<V>
    where
        C: Any + Send + Sync,
    {
        self.enqueue(key, Some(Arc::new(key_context)))
    }

    /// Request several keys at once, results in key order
    pub fn load_many<I>(&self, keys: I) -> BoxFuture<'static, Vec<DataLoaderResult<V>>>
    where
        I: IntoIterator<Item = K>,
    {
        let pending: Vec<LoadFuture<V>> = keys.into_iter().map(|key| self.load(key)).collect();
        future::join_all(pending).boxed()
    }

    fn enqueue(&self, key: K, key_context: Option<ContextValue>) -> LoadFuture<V> {
        let inner = &self.inner;
        inner.stats.record_load();

        let (sender, receiver) = oneshot::channel();
        let name = Arc::clone(&inner.name);
        let received: LoadFuture<V> = async move {
            receiver.await.unwrap_or_else(|_| {
                Err(DataLoaderError::Cancelled {
                    name: name.to_string(),
                })
            })
        }
        .boxed();

        let (result, immediate) = {
            let mut state = inner.lock_state();
            if inner.options.caching_enabled {
                if let Some(cached) = state.cache.get(&key) {
                    inner.stats.record_cache_hit();
                    trace!(loader = %inner.name, key = ?key, "Cache hit");
                    return cached.clone().boxed();
                }
            }

            let result = if inner.options.caching_enabled {
                let shared = received.shared();
                state.cache.insert(key.clone(), shared.clone());
                shared.boxed()
            } else {
                received
            };

            let pending = Pending {
                key,
                key_context,
                sender,
            };
            if inner.options.batching_enabled {
                state.queue.push(pending);
                (result, None)
            } else {
                state.last_dispatch = Instant::now();
                (result, Some(pending))
            }
        };

        match immediate {
            Some(pending) => {
                let running = launch(vec![self.start_batch(vec![pending])]);
                async move { future::join(running, result).await.1 }.boxed()
            }
            None => result,
        }
    }

    /// Send every queued key to the batch loader
    ///
    /// Resolves to the number of keys dispatched once all batches settled.
    pub fn dispatch(&self) -> BoxFuture<'static, usize> {
        let batches = self.take_batches();
        let count: usize = batches.iter().map(Vec::len).sum();
        if count == 0 {
            return future::ready(0).boxed();
        }

        let started: Vec<_> = batches
            .into_iter()
            .map(|batch| self.start_batch(batch))
            .collect();
        let running = launch(started);
        async move {
            running.await;
            count
        }
        .boxed()
    }

    fn take_batches(&self) -> Vec<Vec<Pending<K, V>>> {
        let mut state = self.inner.lock_state();
        if state.queue.is_empty() {
            return Vec::new();
        }
        state.last_dispatch = Instant::now();
        let queue = std::mem::take(&mut state.queue);
        drop(state);

        match self.inner.options.max_batch_size {
            Some(limit) if queue.len() > limit => {
                let mut batches = Vec::with_capacity(queue.len().div_ceil(limit));
                let mut rest = queue.into_iter().peekable();
                while rest.peek().is_some() {
                    batches.push(rest.by_ref().take(limit).collect());
                }
                batches
            }
            _ => vec![queue],
        }
    }

    fn start_batch(&self, batch: Vec<Pending<K, V>>) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        let mut keys = Vec::with_capacity(batch.len());
        let mut key_contexts = Vec::with_capacity(batch.len());
        let mut senders = Vec::with_capacity(batch.len());
        for pending in batch {
            keys.push(pending.key);
            key_contexts.push(pending.key_context);
            senders.push(pending.sender);
        }

        inner.stats.record_batch(keys.len());
        debug!(loader = %inner.name, keys = keys.len(), "Dispatching data loader batch");

        let environment = BatchLoaderEnvironment::new(inner.context.clone(), key_contexts);
        let pending = inner.loader.load_batch(&inner.name, keys, &environment);

        async move {
            match pending.await {
                Ok(results) => {
                    for (sender, result) in senders.into_iter().zip(results) {
                        if result.is_err() {
                            inner.stats.record_load_error();
                        }
                        let _ = sender.send(result);
                    }
                }
                Err(err) => {
                    debug!(loader = %inner.name, error = %err, "Data loader batch failed");
                    inner.stats.record_batch_failure();
                    for sender in senders {
                        inner.stats.record_load_error();
                        let _ = sender.send(Err(DataLoaderError::Batch(err.clone())));
                    }
                }
            }
        }
        .boxed()
    }

    /// Number of keys waiting for dispatch
    pub fn dispatch_depth(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    pub fn time_since_last_dispatch(&self) -> Duration {
        self.inner.lock_state().last_dispatch.elapsed()
    }

    /// Forget the cached result for `key`
    pub fn clear(&self, key: &K) -> &Self {
        self.inner.lock_state().cache.remove(key);
        self
    }

    pub fn clear_all(&self) -> &Self {
        self.inner.lock_state().cache.clear();
        self
    }

    /// Seed the cache with a value unless the key is already cached
    pub fn prime(&self, key: K, value: V) -> &Self {
        if self.inner.options.caching_enabled {
            let ready: LoadFuture<V> = future::ready(Ok(value)).boxed();
            self.inner
                .lock_state()
                .cache
                .entry(key)
                .or_insert_with(|| ready.shared());
        }
        self
    }

    pub fn statistics(&self) -> Statistics {
        self.inner.stats.snapshot()
    }
}

/// Run started batches in the background when a runtime is available
///
/// The returned future resolves once every batch settled.
fn launch(batches: Vec<BoxFuture<'static, ()>>) -> BoxFuture<'static, ()> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let tasks: Vec<_> = batches.into_iter().map(|batch| handle.spawn(batch)).collect();
            async move {
                for task in tasks {
                    let _ = task.await;
                }
            }
            .boxed()
        }
        Err(_) => future::join_all(batches).map(|_| ()).boxed(),
    }
}

impl<K: LoaderKey, V: LoaderValue> Clone for DataLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: LoaderKey, V: LoaderValue> fmt::Debug for DataLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoader")
            .field("name", &self.inner.name)
            .field("shape", &self.shape())
            .field("options", &self.inner.options)
            .field("dispatch_depth", &self.dispatch_depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{batch_error, BatchError};
    use crate::loader::{FnBatchLoader, Listed, Mapped, NoContext, WithContext};
    use assert_matches::assert_matches;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loader(calls: Arc<Mutex<Vec<Vec<u32>>>>) -> DataLoader<u32, String> {
        DataLoader::new(
            "numbers",
            FnBatchLoader::<Listed, NoContext, _>::new(move |keys: Vec<u32>, _env: ()| {
                calls.lock().unwrap().push(keys.clone());
                let values: Vec<String> = keys.iter().map(|k| format!("#{}", k)).collect();
                async move { Ok::<_, BatchError>(values) }
            }),
        )
    }

    #[tokio::test]
    async fn test_loads_are_batched_until_dispatch() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = counting_loader(Arc::clone(&calls));

        let one = loader.load(1);
        let two = loader.load(2);
        assert_eq!(loader.dispatch_depth(), 2);
        assert!(calls.lock().unwrap().is_empty());

        assert_eq!(loader.dispatch().await, 2);
        assert_eq!(one.await.unwrap(), "#1");
        assert_eq!(two.await.unwrap(), "#2");
        assert_eq!(*calls.lock().unwrap(), vec![vec![1, 2]]);
        assert_eq!(loader.dispatch_depth(), 0);
        assert_eq!(loader.dispatch().await, 0);
    }

    #[tokio::test]
    async fn test_cache_shares_results() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = counting_loader(Arc::clone(&calls));

        let first = loader.load(7);
        let second = loader.load(7);
        assert_eq!(loader.dispatch_depth(), 1);
        loader.dispatch().await;
        assert_eq!(first.await.unwrap(), "#7");
        assert_eq!(second.await.unwrap(), "#7");
        assert_eq!(loader.load(7).await.unwrap(), "#7");

        let stats = loader.statistics();
        assert_eq!(stats.load_count, 3);
        assert_eq!(stats.cache_hit_count, 2);
        assert_eq!(stats.batch_invoke_count, 1);

        loader.clear(&7);
        let reloaded = loader.load(7);
        loader.dispatch().await;
        assert_eq!(reloaded.await.unwrap(), "#7");
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prime_and_clear_all() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = counting_loader(Arc::clone(&calls));

        loader.prime(1, "primed".to_string()).prime(1, "ignored".to_string());
        assert_eq!(loader.load(1).await.unwrap(), "primed");
        assert_eq!(loader.dispatch_depth(), 0);

        loader.clear_all();
        let fresh = loader.load(1);
        loader.dispatch().await;
        assert_eq!(fresh.await.unwrap(), "#1");
    }

    #[tokio::test]
    async fn test_max_batch_size_splits_batches() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = counting_loader(Arc::clone(&calls))
            .with_options(DataLoaderOptions::default().with_max_batch_size(2));

        let pending = loader.load_many([1, 2, 3, 4, 5]);
        assert_eq!(loader.dispatch().await, 5);
        let values: Vec<String> = pending.await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec!["#1", "#2", "#3", "#4", "#5"]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![vec![1, 2], vec![3, 4], vec![5]]
        );
    }

    #[tokio::test]
    async fn test_batching_disabled_loads_immediately() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = counting_loader(Arc::clone(&calls))
            .with_options(DataLoaderOptions::default().with_batching(false).with_caching(false));

        let one = loader.load(1);
        assert_eq!(calls.lock().unwrap().len(), 1);
        let also_one = loader.load(1);
        assert_eq!(loader.dispatch_depth(), 0);
        assert_eq!(one.await.unwrap(), "#1");
        assert_eq!(also_one.await.unwrap(), "#1");
        assert_eq!(*calls.lock().unwrap(), vec![vec![1], vec![1]]);
    }

    #[tokio::test]
    async fn test_batch_failure_reaches_every_key() {
        let failure = batch_error("database unavailable");
        let expected = failure.clone();
        let loader: DataLoader<u32, u32> = DataLoader::new(
            "failing",
            FnBatchLoader::<Listed, NoContext, _>::new(move |_keys: Vec<u32>, _env: ()| {
                let failure = failure.clone();
                async move { Err::<Vec<u32>, _>(failure) }
            }),
        );

        let a = loader.load(1);
        let b = loader.load(2);
        loader.dispatch().await;
        for result in [a.await, b.await] {
            assert_matches!(
                result,
                Err(DataLoaderError::Batch(err)) if Arc::ptr_eq(&err, &expected)
            );
        }
        let stats = loader.statistics();
        assert_eq!(stats.batch_load_exception_count, 1);
        assert_eq!(stats.load_error_count, 2);
    }

    #[tokio::test]
    async fn test_mapped_loader_reports_missing_keys() {
        let loader: DataLoader<String, String> = DataLoader::new(
            "letters",
            FnBatchLoader::<Mapped, NoContext, _>::new(
                |keys: HashSet<String>, _env: ()| async move {
                    let values: HashMap<String, String> = keys
                        .into_iter()
                        .filter(|k| k != "z")
                        .map(|k| (k.clone(), k.to_uppercase()))
                        .collect();
                    Ok::<_, BatchError>(values)
                },
            ),
        );

        let a = loader.load("a".to_string());
        let z = loader.load("z".to_string());
        loader.dispatch().await;
        assert_eq!(a.await.unwrap(), "A");
        assert_matches!(z.await, Err(DataLoaderError::MissingKey { name, key }) => {
            assert_eq!(name, "letters");
            assert_eq!(key, "\"z\"");
        });
    }

    #[tokio::test]
    async fn test_environment_carries_contexts() {
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&seen);
        let loader: DataLoader<u32, u32> = DataLoader::from_any(
            "scaled",
            AnyBatchLoader::new(FnBatchLoader::<Listed, WithContext, _>::new(
                move |keys: Vec<u32>, env: BatchLoaderEnvironment| {
                    let factor = *env.context::<u32>().unwrap_or(&1);
                    let offsets: Vec<u32> = (0..keys.len())
                        .map(|i| *env.key_context::<u32>(i).unwrap_or(&0))
                        .collect();
                    observed.store(env.key_contexts().len(), Ordering::SeqCst);
                    async move {
                        Ok::<_, BatchError>(
                            keys.iter()
                                .zip(offsets)
                                .map(|(k, offset)| k * factor + offset)
                                .collect::<Vec<_>>(),
                        )
                    }
                },
            )),
            DataLoaderOptions::default(),
            Some(Arc::new(10u32)),
        );

        let plain = loader.load(1);
        let offset = loader.load_with_context(2, 5u32);
        loader.dispatch().await;
        assert_eq!(plain.await.unwrap(), 10);
        assert_eq!(offset.await.unwrap(), 25);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_sender_resolves_cancelled() {
        let loader: DataLoader<u32, u32> = DataLoader::new(
            "never",
            FnBatchLoader::<Listed, NoContext, _>::new(|_keys: Vec<u32>, _env: ()| {
                future::pending::<Result<Vec<u32>, BatchError>>()
            }),
        );
        let pending = loader.load(1);
        drop(loader);
        assert_matches!(pending.await, Err(DataLoaderError::Cancelled { name }) if name == "never");
    }

    #[test]
    fn test_options_from_config() {
        let config = DataLoaderConfig {
            batching_enabled: false,
            max_batch_size: 25,
            ..Default::default()
        };
        let options = DataLoaderOptions::from_config(&config);
        assert!(!options.batching_enabled);
        assert!(options.caching_enabled);
        assert_eq!(options.max_batch_size, Some(25));
        assert_eq!(
            DataLoaderOptions::default().with_max_batch_size(0).max_batch_size,
            None
        );
    }
}
