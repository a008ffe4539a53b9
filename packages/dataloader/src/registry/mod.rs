//! Data loader registry
//!
//! Holds the loaders of one request by name and dispatches them together.
//! Each loader is dispatched only when its [`DispatchPredicate`] (or the
//! registry default) passes. Loaders skipped with keys still queued are
//! checked again every `schedule_duration` until they dispatch, unless the
//! registry runs in ticker mode, where [`DataLoaderRegistry::start_ticker`]
//! re-runs `dispatch_all` on that interval instead.

mod predicate;

pub use predicate::{DispatchPredicate, LoaderStatus};

use std::any::{type_name, Any};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use dgs_shared_config::DataLoaderConfig;
use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::data_loader::DataLoader;
use crate::error::{DataLoaderError, DataLoaderResult};
use crate::loader::{LoaderKey, LoaderValue};
use crate::statistics::Statistics;

/// Capability of a batch loader that needs the registry owning it
pub trait DataLoaderRegistryConsumer: Send + Sync {
    fn set_data_loader_registry(&self, registry: &DataLoaderRegistry);
}

/// Type-erased view of a [`DataLoader`] used by the registry
pub(crate) trait DispatchableLoader: Send + Sync + 'static {
    fn dispatch(&self) -> BoxFuture<'static, usize>;
    fn dispatch_depth(&self) -> usize;
    fn time_since_last_dispatch(&self) -> Duration;
    fn statistics(&self) -> Statistics;
    fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer>;
    fn as_any(&self) -> &dyn Any;
}

impl<K: LoaderKey, V: LoaderValue> DispatchableLoader for DataLoader<K, V> {
    fn dispatch(&self) -> BoxFuture<'static, usize> {
        DataLoader::dispatch(self)
    }

    fn dispatch_depth(&self) -> usize {
        DataLoader::dispatch_depth(self)
    }

    fn time_since_last_dispatch(&self) -> Duration {
        DataLoader::time_since_last_dispatch(self)
    }

    fn statistics(&self) -> Statistics {
        DataLoader::statistics(self)
    }

    fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer> {
        DataLoader::registry_consumer(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RegisteredLoader {
    loader: Arc<dyn DispatchableLoader>,
    predicate: Option<DispatchPredicate>,
}

struct RegistryInner {
    loaders: DashMap<String, RegisteredLoader>,
    default_predicate: DispatchPredicate,
    schedule: Duration,
    ticker_mode: bool,
    rescheduled: DashSet<String>,
}

/// Named data loaders of one request
///
/// Cloning is cheap; clones share the same loaders.
#[derive(Clone)]
pub struct DataLoaderRegistry {
    inner: Arc<RegistryInner>,
}

/// Non-owning handle to a registry, for loaders that keep one around
#[derive(Clone, Debug)]
pub struct WeakDataLoaderRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakDataLoaderRegistry {
    pub fn upgrade(&self) -> Option<DataLoaderRegistry> {
        self.inner.upgrade().map(|inner| DataLoaderRegistry { inner })
    }
}

/// Builder for [`DataLoaderRegistry`]
#[derive(Debug, Clone)]
pub struct DataLoaderRegistryBuilder {
    default_predicate: DispatchPredicate,
    schedule: Duration,
    ticker_mode: bool,
}

impl DataLoaderRegistryBuilder {
    /// Predicate for loaders registered without their own
    pub fn default_predicate(mut self, predicate: DispatchPredicate) -> Self {
        self.default_predicate = predicate;
        self
    }

    pub fn schedule_duration(mut self, schedule: Duration) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn ticker_mode(mut self, ticker_mode: bool) -> Self {
        self.ticker_mode = ticker_mode;
        self
    }

    /// Apply scheduler settings from configuration
    pub fn config(self, config: &DataLoaderConfig) -> Self {
        self.schedule_duration(config.schedule_duration())
            .ticker_mode(config.ticker_mode)
    }

    pub fn build(self) -> DataLoaderRegistry {
        DataLoaderRegistry {
            inner: Arc::new(RegistryInner {
                loaders: DashMap::new(),
                default_predicate: self.default_predicate,
                schedule: self.schedule,
                ticker_mode: self.ticker_mode,
                rescheduled: DashSet::new(),
            }),
        }
    }
}

impl Default for DataLoaderRegistryBuilder {
    fn default() -> Self {
        let config = DataLoaderConfig::default();
        Self {
            default_predicate: DispatchPredicate::always(),
            schedule: config.schedule_duration(),
            ticker_mode: config.ticker_mode,
        }
    }
}

enum Retry {
    Dispatched(BoxFuture<'static, usize>),
    Waiting,
    Done,
}

impl DataLoaderRegistry {
    pub fn builder() -> DataLoaderRegistryBuilder {
        DataLoaderRegistryBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Register a loader under its own name
    pub fn register<K: LoaderKey, V: LoaderValue>(
        &self,
        loader: DataLoader<K, V>,
    ) -> DataLoaderResult<()> {
        self.insert(loader, None)
    }

    /// Register a loader with a predicate overriding the registry default
    pub fn register_with_predicate<K: LoaderKey, V: LoaderValue>(
        &self,
        loader: DataLoader<K, V>,
        predicate: DispatchPredicate,
    ) -> DataLoaderResult<()> {
        self.insert(loader, Some(predicate))
    }

    fn insert<K: LoaderKey, V: LoaderValue>(
        &self,
        loader: DataLoader<K, V>,
        predicate: Option<DispatchPredicate>,
    ) -> DataLoaderResult<()> {
        match self.inner.loaders.entry(loader.name().to_string()) {
            Entry::Occupied(entry) => Err(DataLoaderError::DuplicateLoader(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(RegisteredLoader {
                    loader: Arc::new(loader),
                    predicate,
                });
                Ok(())
            }
        }
    }

    /// Remove a loader, returning whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        self.inner.loaders.remove(name).is_some()
    }

    /// Look up a loader by name and key/value types
    pub fn get<K: LoaderKey, V: LoaderValue>(
        &self,
        name: &str,
    ) -> DataLoaderResult<DataLoader<K, V>> {
        let entry = self
            .inner
            .loaders
            .get(name)
            .ok_or_else(|| DataLoaderError::UnknownLoader(name.to_string()))?;
        downcast(name, entry.loader.as_ref())
    }

    /// Return the loader registered under `name`, registering the one built
    /// by `create` if there is none
    ///
    /// `create` runs outside the map's locks and may be called even when a
    /// concurrent caller wins the registration; the loser's loader is
    /// discarded. A newly registered loader that consumes the registry is
    /// handed this registry.
    pub fn compute_if_absent<K, V, F>(
        &self,
        name: &str,
        create: F,
    ) -> DataLoaderResult<DataLoader<K, V>>
    where
        K: LoaderKey,
        V: LoaderValue,
        F: FnOnce(&str) -> DataLoader<K, V>,
    {
        match self.get(name) {
            Err(DataLoaderError::UnknownLoader(_)) => {}
            found => return found,
        }

        let created = create(name);
        if created.name() != name {
            return Err(DataLoaderError::Configuration(format!(
                "loader `{}` cannot be registered under `{}`",
                created.name(),
                name
            )));
        }

        let loader = match self.inner.loaders.entry(name.to_string()) {
            Entry::Occupied(entry) => return downcast(name, entry.get().loader.as_ref()),
            Entry::Vacant(entry) => {
                entry.insert(RegisteredLoader {
                    loader: Arc::new(created.clone()),
                    predicate: None,
                });
                created
            }
        };

        if let Some(consumer) = loader.registry_consumer() {
            debug!(loader = %name, "Passing registry to loader");
            consumer.set_data_loader_registry(self);
        }
        Ok(loader)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.loaders.contains_key(name)
    }

    /// Registered names, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .loaders
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.loaders.is_empty()
    }

    pub fn schedule_duration(&self) -> Duration {
        self.inner.schedule
    }

    pub fn is_ticker_mode(&self) -> bool {
        self.inner.ticker_mode
    }

    fn entries(&self) -> Vec<(String, Arc<dyn DispatchableLoader>, DispatchPredicate)> {
        self.inner
            .loaders
            .iter()
            .map(|entry| {
                let predicate = entry
                    .predicate
                    .clone()
                    .unwrap_or_else(|| self.inner.default_predicate.clone());
                (entry.key().clone(), Arc::clone(&entry.loader), predicate)
            })
            .collect()
    }

    /// Dispatch every loader whose predicate passes
    pub fn dispatch_all(&self) -> BoxFuture<'static, ()> {
        self.dispatch_all_with_count().map(|_| ()).boxed()
    }

    /// Like [`dispatch_all`](Self::dispatch_all), resolving to the number of
    /// keys dispatched
    pub fn dispatch_all_with_count(&self) -> BoxFuture<'static, usize> {
        let mut running = Vec::new();
        for (name, loader, predicate) in self.entries() {
            let status = status_of(loader.as_ref());
            if predicate.test(&name, &status) {
                running.push(loader.dispatch());
            } else if status.dispatch_depth > 0 && !self.inner.ticker_mode {
                self.reschedule(name);
            }
        }
        sum_dispatched(running)
    }

    /// Dispatch every loader regardless of predicates
    pub fn dispatch_all_immediately(&self) -> BoxFuture<'static, usize> {
        let running: Vec<_> = self
            .entries()
            .into_iter()
            .map(|(_, loader, _)| loader.dispatch())
            .collect();
        sum_dispatched(running)
    }

    fn reschedule(&self, name: String) {
        if !self.inner.rescheduled.insert(name.clone()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(
                loader = %name,
                "No runtime to reschedule dispatch, waiting for the next dispatch_all"
            );
            self.inner.rescheduled.remove(&name);
            return;
        };

        debug!(
            loader = %name,
            schedule_ms = self.inner.schedule.as_millis() as u64,
            "Rescheduling dispatch"
        );
        let weak = self.downgrade();
        let schedule = self.inner.schedule;
        runtime.spawn(async move {
            loop {
                tokio::time::sleep(schedule).await;
                let Some(registry) = weak.upgrade() else {
                    return;
                };
                let retry = registry.retry(&name);
                if !matches!(retry, Retry::Waiting) {
                    registry.inner.rescheduled.remove(&name);
                }
                drop(registry);
                match retry {
                    Retry::Dispatched(pending) => {
                        pending.await;
                        return;
                    }
                    Retry::Done => return,
                    Retry::Waiting => {}
                }
            }
        });
    }

    fn retry(&self, name: &str) -> Retry {
        let Some((loader, predicate)) = self.inner.loaders.get(name).map(|entry| {
            let predicate = entry
                .predicate
                .clone()
                .unwrap_or_else(|| self.inner.default_predicate.clone());
            (Arc::clone(&entry.loader), predicate)
        }) else {
            return Retry::Done;
        };

        let status = status_of(loader.as_ref());
        if status.dispatch_depth == 0 {
            Retry::Done
        } else if predicate.test(name, &status) {
            Retry::Dispatched(loader.dispatch())
        } else {
            Retry::Waiting
        }
    }

    /// Re-run `dispatch_all` every `schedule_duration` until the handle is
    /// dropped or the registry is gone
    ///
    /// Must be called within a Tokio runtime.
    pub fn start_ticker(&self) -> TickerHandle {
        let weak = self.downgrade();
        let schedule = self.inner.schedule.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(schedule);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                let pending = registry.dispatch_all_with_count();
                drop(registry);
                pending.await;
            }
        });
        TickerHandle { task }
    }

    /// Total keys waiting across all loaders
    pub fn dispatch_depth(&self) -> usize {
        self.inner
            .loaders
            .iter()
            .map(|entry| entry.loader.dispatch_depth())
            .sum()
    }

    /// Combined statistics of all loaders
    pub fn statistics(&self) -> Statistics {
        self.inner
            .loaders
            .iter()
            .fold(Statistics::default(), |total, entry| {
                total.combine(&entry.loader.statistics())
            })
    }

    /// Hand this registry to every loader that asks for it
    pub(crate) fn notify_consumers(&self) {
        for (name, loader, _) in self.entries() {
            if let Some(consumer) = loader.registry_consumer() {
                debug!(loader = %name, "Passing registry to loader");
                consumer.set_data_loader_registry(self);
            }
        }
    }

    pub fn downgrade(&self) -> WeakDataLoaderRegistry {
        WeakDataLoaderRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same registry
    pub fn ptr_eq(&self, other: &DataLoaderRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn downcast<K: LoaderKey, V: LoaderValue>(
    name: &str,
    loader: &dyn DispatchableLoader,
) -> DataLoaderResult<DataLoader<K, V>> {
    loader
        .as_any()
        .downcast_ref::<DataLoader<K, V>>()
        .cloned()
        .ok_or_else(|| DataLoaderError::TypeMismatch {
            name: name.to_string(),
            key_type: type_name::<K>(),
            value_type: type_name::<V>(),
        })
}

fn status_of(loader: &dyn DispatchableLoader) -> LoaderStatus {
    LoaderStatus {
        dispatch_depth: loader.dispatch_depth(),
        time_since_last_dispatch: loader.time_since_last_dispatch(),
    }
}

fn sum_dispatched(running: Vec<BoxFuture<'static, usize>>) -> BoxFuture<'static, usize> {
    future::join_all(running)
        .map(|counts| counts.into_iter().sum())
        .boxed()
}

impl Default for DataLoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataLoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoaderRegistry")
            .field("loaders", &self.keys())
            .field("schedule", &self.inner.schedule)
            .field("ticker_mode", &self.inner.ticker_mode)
            .finish()
    }
}

/// Stops the ticker started by [`DataLoaderRegistry::start_ticker`] when
/// dropped
#[derive(Debug)]
pub struct TickerHandle {
    task: JoinHandle<()>,
}

impl TickerHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
