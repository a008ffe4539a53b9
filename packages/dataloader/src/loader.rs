//! Batch loader interface
//!
//! A batch loader resolves many keys in one call. Loaders differ along two
//! independent axes, each expressed as an associated type of
//! [`BatchLoader`]:
//!
//! - [`BatchMode`]: [`Listed`] loaders receive an ordered `Vec<K>` and answer
//!   with a `Vec<V>` aligned by position; [`Mapped`] loaders receive a
//!   `HashSet<K>` and answer with a `HashMap<K, V>`.
//! - [`ContextMode`]: [`WithContext`] loaders receive the
//!   [`BatchLoaderEnvironment`] of the dispatch, [`NoContext`] loaders do not.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::environment::BatchLoaderEnvironment;
use crate::error::{BatchError, DataLoaderError, DataLoaderResult};
use crate::registry::DataLoaderRegistryConsumer;

/// Pending result of a batch load
pub type BatchFuture<T> = BoxFuture<'static, Result<T, BatchError>>;

/// Keys accepted by a loader of mode `M`
pub type Keys<M, K> = <M as BatchMode>::Keys<K>;

/// Values produced by a loader of mode `M`
pub type Values<M, K, V> = <M as BatchMode>::Values<K, V>;

/// Environment argument for a loader of context mode `C`
pub type Env<C> = <C as ContextMode>::Env;

/// Requirements on loader keys
pub trait LoaderKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> LoaderKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Requirements on loader values
pub trait LoaderValue: Clone + Send + Sync + 'static {}

impl<T> LoaderValue for T where T: Clone + Send + Sync + 'static {}

/// Type-erased view of a dispatched key, as seen by instrumentation
pub trait DispatchKey: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> DispatchKey for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased view of a batch result, as seen by instrumentation
///
/// Downcast with `as_any` to `Vec<V>` for list loaders or
/// `HashMap<K, V>` for mapped loaders.
pub trait BatchValues: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_any(&self) -> &dyn Any;
}

impl<V: Send + Sync + 'static> BatchValues for Vec<V> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<K, V, S> BatchValues for HashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Whether results are positional or keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    List,
    Mapped,
}

/// The (kind, context) pair describing a loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderShape {
    pub kind: BatchKind,
    pub with_context: bool,
}

impl fmt::Display for LoaderShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            BatchKind::List => "list",
            BatchKind::Mapped => "mapped",
        };
        if self.with_context {
            write!(f, "{}-with-context", kind)
        } else {
            f.write_str(kind)
        }
    }
}

/// Shape of the keys a loader accepts and the values it returns
pub trait BatchMode: Sized + Send + Sync + 'static {
    type Keys<K: LoaderKey>: Send + 'static;
    type Values<K: LoaderKey, V: LoaderValue>: BatchValues + 'static;

    const KIND: BatchKind;

    /// Build the loader input from keys in queue order
    fn collect_keys<K: LoaderKey>(keys: Vec<K>) -> Self::Keys<K>;

    /// Keys in the order they are reported to instrumentation
    fn key_refs<K: LoaderKey>(keys: &Self::Keys<K>) -> Vec<&K>;

    /// Hand one result to each queued key, in queue order
    fn distribute<K: LoaderKey, V: LoaderValue>(
        name: &str,
        keys: &[K],
        values: Self::Values<K, V>,
    ) -> Vec<DataLoaderResult<V>>;

    #[doc(hidden)]
    fn erase<K: LoaderKey, V: LoaderValue, C: ContextMode>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Self, Context = C>>,
    ) -> AnyBatchLoader<K, V>;
}

/// Ordered keys, positional values
#[derive(Debug, Clone, Copy, Default)]
pub struct Listed;

/// Unique keys, keyed values
#[derive(Debug, Clone, Copy, Default)]
pub struct Mapped;

impl BatchMode for Listed {
    type Keys<K: LoaderKey> = Vec<K>;
    type Values<K: LoaderKey, V: LoaderValue> = Vec<V>;

    const KIND: BatchKind = BatchKind::List;

    fn collect_keys<K: LoaderKey>(keys: Vec<K>) -> Vec<K> {
        keys
    }

    fn key_refs<K: LoaderKey>(keys: &Vec<K>) -> Vec<&K> {
        keys.iter().collect()
    }

    fn distribute<K: LoaderKey, V: LoaderValue>(
        name: &str,
        keys: &[K],
        values: Vec<V>,
    ) -> Vec<DataLoaderResult<V>> {
        if values.len() != keys.len() {
            let err = DataLoaderError::BatchSizeMismatch {
                name: name.to_string(),
                expected: keys.len(),
                actual: values.len(),
            };
            return keys.iter().map(|_| Err(err.clone())).collect();
        }
        values.into_iter().map(Ok).collect()
    }

    fn erase<K: LoaderKey, V: LoaderValue, C: ContextMode>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Self, Context = C>>,
    ) -> AnyBatchLoader<K, V> {
        C::erase_list(loader)
    }
}

impl BatchMode for Mapped {
    type Keys<K: LoaderKey> = HashSet<K>;
    type Values<K: LoaderKey, V: LoaderValue> = HashMap<K, V>;

    const KIND: BatchKind = BatchKind::Mapped;

    fn collect_keys<K: LoaderKey>(keys: Vec<K>) -> HashSet<K> {
        keys.into_iter().collect()
    }

    fn key_refs<K: LoaderKey>(keys: &HashSet<K>) -> Vec<&K> {
        keys.iter().collect()
    }

    fn distribute<K: LoaderKey, V: LoaderValue>(
        name: &str,
        keys: &[K],
        values: HashMap<K, V>,
    ) -> Vec<DataLoaderResult<V>> {
        keys.iter()
            .map(|key| {
                values
                    .get(key)
                    .cloned()
                    .ok_or_else(|| DataLoaderError::MissingKey {
                        name: name.to_string(),
                        key: format!("{:?}", key),
                    })
            })
            .collect()
    }

    fn erase<K: LoaderKey, V: LoaderValue, C: ContextMode>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Self, Context = C>>,
    ) -> AnyBatchLoader<K, V> {
        C::erase_mapped(loader)
    }
}

/// Whether a loader receives the dispatch environment
pub trait ContextMode: Sized + Send + Sync + 'static {
    type Env: Send + 'static;

    const WITH_CONTEXT: bool;

    fn project(environment: &BatchLoaderEnvironment) -> Self::Env;

    #[doc(hidden)]
    fn erase_list<K: LoaderKey, V: LoaderValue>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Listed, Context = Self>>,
    ) -> AnyBatchLoader<K, V>;

    #[doc(hidden)]
    fn erase_mapped<K: LoaderKey, V: LoaderValue>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Mapped, Context = Self>>,
    ) -> AnyBatchLoader<K, V>;
}

/// The loader ignores the dispatch environment
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

/// The loader receives the dispatch environment
#[derive(Debug, Clone, Copy, Default)]
pub struct WithContext;

impl ContextMode for NoContext {
    type Env = ();

    const WITH_CONTEXT: bool = false;

    fn project(_environment: &BatchLoaderEnvironment) {}

    fn erase_list<K: LoaderKey, V: LoaderValue>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Listed, Context = Self>>,
    ) -> AnyBatchLoader<K, V> {
        AnyBatchLoader::List(loader)
    }

    fn erase_mapped<K: LoaderKey, V: LoaderValue>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Mapped, Context = Self>>,
    ) -> AnyBatchLoader<K, V> {
        AnyBatchLoader::Mapped(loader)
    }
}

impl ContextMode for WithContext {
    type Env = BatchLoaderEnvironment;

    const WITH_CONTEXT: bool = true;

    fn project(environment: &BatchLoaderEnvironment) -> BatchLoaderEnvironment {
        environment.clone()
    }

    fn erase_list<K: LoaderKey, V: LoaderValue>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Listed, Context = Self>>,
    ) -> AnyBatchLoader<K, V> {
        AnyBatchLoader::ListWithContext(loader)
    }

    fn erase_mapped<K: LoaderKey, V: LoaderValue>(
        loader: Arc<dyn BatchLoader<K, V, Mode = Mapped, Context = Self>>,
    ) -> AnyBatchLoader<K, V> {
        AnyBatchLoader::MappedWithContext(loader)
    }
}

/// A function resolving a batch of keys
///
/// `load` is called synchronously when a batch is dispatched; the returned
/// future may complete on any thread and must settle exactly once.
pub trait BatchLoader<K: LoaderKey, V: LoaderValue>: Send + Sync + 'static {
    type Mode: BatchMode;
    type Context: ContextMode;

    fn load(
        &self,
        keys: Keys<Self::Mode, K>,
        environment: Env<Self::Context>,
    ) -> BatchFuture<Values<Self::Mode, K, V>>;

    /// Loaders that need the owning registry return `Some(self)`
    fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer> {
        None
    }
}

type DynLoader<K, V, M, C> = dyn BatchLoader<K, V, Mode = M, Context = C>;

/// A batch loader of any shape
pub enum AnyBatchLoader<K: LoaderKey, V: LoaderValue> {
    List(Arc<DynLoader<K, V, Listed, NoContext>>),
    ListWithContext(Arc<DynLoader<K, V, Listed, WithContext>>),
    Mapped(Arc<DynLoader<K, V, Mapped, NoContext>>),
    MappedWithContext(Arc<DynLoader<K, V, Mapped, WithContext>>),
}

impl<K: LoaderKey, V: LoaderValue> AnyBatchLoader<K, V> {
    pub fn new<L>(loader: L) -> Self
    where
        L: BatchLoader<K, V>,
    {
        let loader: Arc<DynLoader<K, V, L::Mode, L::Context>> = Arc::new(loader);
        <L::Mode as BatchMode>::erase(loader)
    }

    pub fn shape(&self) -> LoaderShape {
        let (kind, with_context) = match self {
            Self::List(_) => (BatchKind::List, false),
            Self::ListWithContext(_) => (BatchKind::List, true),
            Self::Mapped(_) => (BatchKind::Mapped, false),
            Self::MappedWithContext(_) => (BatchKind::Mapped, true),
        };
        LoaderShape { kind, with_context }
    }

    pub fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer> {
        match self {
            Self::List(loader) => loader.registry_consumer(),
            Self::ListWithContext(loader) => loader.registry_consumer(),
            Self::Mapped(loader) => loader.registry_consumer(),
            Self::MappedWithContext(loader) => loader.registry_consumer(),
        }
    }

    /// Start a batch for keys in queue order, resolving to one result per key
    pub(crate) fn load_batch(
        &self,
        name: &Arc<str>,
        keys: Vec<K>,
        environment: &BatchLoaderEnvironment,
    ) -> BoxFuture<'static, Result<Vec<DataLoaderResult<V>>, BatchError>> {
        match self {
            Self::List(loader) => start_batch(loader.as_ref(), name, keys, environment),
            Self::ListWithContext(loader) => start_batch(loader.as_ref(), name, keys, environment),
            Self::Mapped(loader) => start_batch(loader.as_ref(), name, keys, environment),
            Self::MappedWithContext(loader) => {
                start_batch(loader.as_ref(), name, keys, environment)
            }
        }
    }
}

fn start_batch<K, V, L>(
    loader: &L,
    name: &Arc<str>,
    keys: Vec<K>,
    environment: &BatchLoaderEnvironment,
) -> BoxFuture<'static, Result<Vec<DataLoaderResult<V>>, BatchError>>
where
    K: LoaderKey,
    V: LoaderValue,
    L: BatchLoader<K, V> + ?Sized,
{
    let batch_keys = <L::Mode as BatchMode>::collect_keys(keys.clone());
    let pending = loader.load(batch_keys, <L::Context as ContextMode>::project(environment));
    let name = Arc::clone(name);

    async move {
        let values = pending.await?;
        Ok::<_, BatchError>(<L::Mode as BatchMode>::distribute(&name, &keys, values))
    }
    .boxed()
}

impl<K: LoaderKey, V: LoaderValue> Clone for AnyBatchLoader<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::List(loader) => Self::List(Arc::clone(loader)),
            Self::ListWithContext(loader) => Self::ListWithContext(Arc::clone(loader)),
            Self::Mapped(loader) => Self::Mapped(Arc::clone(loader)),
            Self::MappedWithContext(loader) => Self::MappedWithContext(Arc::clone(loader)),
        }
    }
}

impl<K: LoaderKey, V: LoaderValue> fmt::Debug for AnyBatchLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyBatchLoader").field(&self.shape()).finish()
    }
}

/// Batch loader backed by a closure
///
/// ```
/// use dgs_dataloader::{BatchError, FnBatchLoader, Listed, NoContext};
///
/// let loader = FnBatchLoader::<Listed, NoContext, _>::new(|keys: Vec<u32>, _env: ()| async move {
///     Ok::<_, BatchError>(keys.iter().map(|k| k * 2).collect::<Vec<u32>>())
/// });
/// # let _ = loader;
/// ```
pub struct FnBatchLoader<M, C, F> {
    load_fn: F,
    _shape: PhantomData<fn() -> (M, C)>,
}

impl<M: BatchMode, C: ContextMode, F> FnBatchLoader<M, C, F> {
    pub fn new(load_fn: F) -> Self {
        Self {
            load_fn,
            _shape: PhantomData,
        }
    }
}

impl<K, V, M, C, F, Fut> BatchLoader<K, V> for FnBatchLoader<M, C, F>
where
    K: LoaderKey,
    V: LoaderValue,
    M: BatchMode,
    C: ContextMode,
    F: Fn(Keys<M, K>, Env<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Values<M, K, V>, BatchError>> + Send + 'static,
{
    type Mode = M;
    type Context = C;

    fn load(&self, keys: Keys<M, K>, environment: Env<C>) -> BatchFuture<Values<M, K, V>> {
        (self.load_fn)(keys, environment).boxed()
    }
}
