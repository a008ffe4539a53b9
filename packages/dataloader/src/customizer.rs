//! Wiring-time loader customization
//!
//! Customizers run once per loader when it is registered with a
//! [`DataLoaderProvider`](crate::DataLoaderProvider), in the order they were
//! added. They see the loader through [`CustomizableLoader`] and may replace
//! it with a wrapped version.

use std::sync::Arc;

use tracing::debug;

use crate::environment::BatchLoaderEnvironment;
use crate::error::{DataLoaderInstrumentationError, DataLoaderResult};
use crate::instrumentation::{
    DataLoaderInstrumentation, InstrumentationDriver, InstrumentationHooks,
};
use crate::loader::{
    AnyBatchLoader, BatchFuture, BatchLoader, BatchMode, Keys, LoaderKey, LoaderShape,
    LoaderValue, NoContext, Values, WithContext,
};
use crate::registry::DataLoaderRegistryConsumer;

/// A registered loader as seen by customizers
pub trait CustomizableLoader {
    fn name(&self) -> &str;

    fn shape(&self) -> LoaderShape;

    /// Turn a loader without context into one that receives (and ignores)
    /// the batch environment; loaders with context are left alone
    fn wrap_with_context(&mut self);

    /// Wrap the loader so `hooks` observe every batch
    ///
    /// Fails for loaders without context, leaving the loader unchanged.
    fn instrument(
        &mut self,
        hooks: &InstrumentationHooks,
    ) -> Result<(), DataLoaderInstrumentationError>;
}

/// Transformation applied to every registered loader
pub trait DataLoaderCustomizer: Send + Sync + 'static {
    fn customize(&self, loader: &mut dyn CustomizableLoader) -> DataLoaderResult<()>;
}

impl<F> DataLoaderCustomizer for F
where
    F: Fn(&mut dyn CustomizableLoader) -> DataLoaderResult<()> + Send + Sync + 'static,
{
    fn customize(&self, loader: &mut dyn CustomizableLoader) -> DataLoaderResult<()> {
        self(loader)
    }
}

/// A batch loader together with its registration name
pub struct NamedBatchLoader<K: LoaderKey, V: LoaderValue> {
    name: Arc<str>,
    loader: AnyBatchLoader<K, V>,
}

impl<K: LoaderKey, V: LoaderValue> NamedBatchLoader<K, V> {
    pub fn new(name: impl Into<Arc<str>>, loader: AnyBatchLoader<K, V>) -> Self {
        Self {
            name: name.into(),
            loader,
        }
    }

    pub fn loader(&self) -> &AnyBatchLoader<K, V> {
        &self.loader
    }

    pub fn into_parts(self) -> (Arc<str>, AnyBatchLoader<K, V>) {
        (self.name, self.loader)
    }
}

impl<K: LoaderKey, V: LoaderValue> CustomizableLoader for NamedBatchLoader<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn shape(&self) -> LoaderShape {
        self.loader.shape()
    }

    fn wrap_with_context(&mut self) {
        let wrapped: AnyBatchLoader<K, V> = match &self.loader {
            AnyBatchLoader::List(original) => AnyBatchLoader::ListWithContext(Arc::new(
                WithContextWrapper::new(Arc::clone(original)),
            )),
            AnyBatchLoader::Mapped(original) => AnyBatchLoader::MappedWithContext(Arc::new(
                WithContextWrapper::new(Arc::clone(original)),
            )),
            AnyBatchLoader::ListWithContext(_) | AnyBatchLoader::MappedWithContext(_) => return,
        };
        self.loader = wrapped;
    }

    fn instrument(
        &mut self,
        hooks: &InstrumentationHooks,
    ) -> Result<(), DataLoaderInstrumentationError> {
        let name = &self.name;
        let instrumented: AnyBatchLoader<K, V> = match &self.loader {
            AnyBatchLoader::ListWithContext(original) => {
                AnyBatchLoader::ListWithContext(Arc::new(InstrumentationDriver::new(
                    Arc::clone(name),
                    Arc::clone(original),
                    Arc::clone(hooks),
                )))
            }
            AnyBatchLoader::MappedWithContext(original) => {
                AnyBatchLoader::MappedWithContext(Arc::new(InstrumentationDriver::new(
                    Arc::clone(name),
                    Arc::clone(original),
                    Arc::clone(hooks),
                )))
            }
            AnyBatchLoader::List(_) | AnyBatchLoader::Mapped(_) => {
                return Err(DataLoaderInstrumentationError::new(self.name.to_string()));
            }
        };
        self.loader = instrumented;
        Ok(())
    }
}

/// Presents a loader without context as one that receives the environment
pub struct WithContextWrapper<K: LoaderKey, V: LoaderValue, M: BatchMode> {
    original: Arc<dyn BatchLoader<K, V, Mode = M, Context = NoContext>>,
}

impl<K: LoaderKey, V: LoaderValue, M: BatchMode> WithContextWrapper<K, V, M> {
    pub fn new(original: Arc<dyn BatchLoader<K, V, Mode = M, Context = NoContext>>) -> Self {
        Self { original }
    }
}

impl<K: LoaderKey, V: LoaderValue, M: BatchMode> BatchLoader<K, V> for WithContextWrapper<K, V, M> {
    type Mode = M;
    type Context = WithContext;

    fn load(
        &self,
        keys: Keys<M, K>,
        _environment: BatchLoaderEnvironment,
    ) -> BatchFuture<Values<M, K, V>> {
        self.original.load(keys, ())
    }

    fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer> {
        self.original.registry_consumer()
    }
}

/// Converts loaders without context so they can be instrumented
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapWithContextCustomizer;

impl DataLoaderCustomizer for WrapWithContextCustomizer {
    fn customize(&self, loader: &mut dyn CustomizableLoader) -> DataLoaderResult<()> {
        if !loader.shape().with_context {
            debug!(loader = %loader.name(), "Wrapping data loader with context");
            loader.wrap_with_context();
        }
        Ok(())
    }
}

/// Wraps every loader in an [`InstrumentationDriver`] running the given hooks
///
/// Hooks observe dispatches in the order given here. Loaders without
/// context are rejected with [`DataLoaderInstrumentationError`]; register
/// [`WrapWithContextCustomizer`] first to instrument them anyway.
pub struct InstrumentationCustomizer {
    hooks: InstrumentationHooks,
}

impl InstrumentationCustomizer {
    pub fn new<I>(hooks: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn DataLoaderInstrumentation>>,
    {
        Self {
            hooks: hooks.into_iter().collect(),
        }
    }

    pub fn hooks(&self) -> &InstrumentationHooks {
        &self.hooks
    }
}

impl DataLoaderCustomizer for InstrumentationCustomizer {
    fn customize(&self, loader: &mut dyn CustomizableLoader) -> DataLoaderResult<()> {
        loader.instrument(&self.hooks)?;
        debug!(
            loader = %loader.name(),
            hooks = self.hooks.len(),
            "Instrumented data loader"
        );
        Ok(())
    }
}
