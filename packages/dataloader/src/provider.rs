//! Explicit data loader registration
//!
//! Loaders are registered once at startup on a [`DataLoaderProviderBuilder`].
//! Customizers run at registration time, so wiring mistakes such as
//! instrumenting a loader without context fail before any request is
//! served. The provider then builds a fresh [`DataLoaderRegistry`] per
//! request.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dgs_shared_config::{DataLoaderConfig, DgsConfig};
use tracing::debug;

use crate::customizer::{DataLoaderCustomizer, NamedBatchLoader};
use crate::data_loader::{DataLoader, DataLoaderOptions};
use crate::environment::ContextValue;
use crate::error::{DataLoaderError, DataLoaderResult};
use crate::loader::{AnyBatchLoader, BatchLoader, LoaderKey, LoaderShape, LoaderValue};
use crate::registry::{DataLoaderRegistry, DispatchPredicate};

trait Registration: Send + Sync {
    fn name(&self) -> &str;

    fn shape(&self) -> LoaderShape;

    fn register_into(
        &self,
        registry: &DataLoaderRegistry,
        default_options: DataLoaderOptions,
        context: Option<&ContextValue>,
    ) -> DataLoaderResult<()>;
}

struct TypedRegistration<K: LoaderKey, V: LoaderValue> {
    name: Arc<str>,
    loader: AnyBatchLoader<K, V>,
    options: Option<DataLoaderOptions>,
    predicate: Option<DispatchPredicate>,
}

impl<K: LoaderKey, V: LoaderValue> Registration for TypedRegistration<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn shape(&self) -> LoaderShape {
        self.loader.shape()
    }

    fn register_into(
        &self,
        registry: &DataLoaderRegistry,
        default_options: DataLoaderOptions,
        context: Option<&ContextValue>,
    ) -> DataLoaderResult<()> {
        let loader = DataLoader::from_any(
            Arc::clone(&self.name),
            self.loader.clone(),
            self.options.unwrap_or(default_options),
            context.cloned(),
        );
        match &self.predicate {
            Some(predicate) => registry.register_with_predicate(loader, predicate.clone()),
            None => registry.register(loader),
        }
    }
}

/// Registers loaders and customizers, producing a [`DataLoaderProvider`]
pub struct DataLoaderProviderBuilder {
    customizers: Vec<Box<dyn DataLoaderCustomizer>>,
    registrations: Vec<Box<dyn Registration>>,
    options: DataLoaderOptions,
    default_predicate: DispatchPredicate,
    schedule: Duration,
    ticker_mode: bool,
}

impl DataLoaderProviderBuilder {
    /// Start a builder from the service configuration
    pub fn from_config(config: &DgsConfig) -> Self {
        Self::default().config(&config.dataloader)
    }

    /// Add a customizer applied to every loader registered after it
    pub fn customizer(mut self, customizer: impl DataLoaderCustomizer) -> Self {
        self.customizers.push(Box::new(customizer));
        self
    }

    /// Options for loaders registered without their own
    pub fn options(mut self, options: DataLoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Predicate for loaders registered without their own
    pub fn default_predicate(mut self, predicate: DispatchPredicate) -> Self {
        self.default_predicate = predicate;
        self
    }

    /// Apply loader defaults and scheduler settings from configuration
    pub fn config(mut self, config: &DataLoaderConfig) -> Self {
        self.options = DataLoaderOptions::from_config(config);
        self.schedule = config.schedule_duration();
        self.ticker_mode = config.ticker_mode;
        self
    }

    pub fn register<K, V, L>(self, name: impl Into<String>, loader: L) -> DataLoaderResult<Self>
    where
        K: LoaderKey,
        V: LoaderValue,
        L: BatchLoader<K, V>,
    {
        self.register_any(name, AnyBatchLoader::new(loader), None, None)
    }

    pub fn register_with_predicate<K, V, L>(
        self,
        name: impl Into<String>,
        loader: L,
        predicate: DispatchPredicate,
    ) -> DataLoaderResult<Self>
    where
        K: LoaderKey,
        V: LoaderValue,
        L: BatchLoader<K, V>,
    {
        self.register_any(name, AnyBatchLoader::new(loader), None, Some(predicate))
    }

    pub fn register_with_options<K, V, L>(
        self,
        name: impl Into<String>,
        loader: L,
        options: DataLoaderOptions,
    ) -> DataLoaderResult<Self>
    where
        K: LoaderKey,
        V: LoaderValue,
        L: BatchLoader<K, V>,
    {
        self.register_any(name, AnyBatchLoader::new(loader), Some(options), None)
    }

    /// Register an erased loader, running every customizer on it
    pub fn register_any<K: LoaderKey, V: LoaderValue>(
        mut self,
        name: impl Into<String>,
        loader: AnyBatchLoader<K, V>,
        options: Option<DataLoaderOptions>,
        predicate: Option<DispatchPredicate>,
    ) -> DataLoaderResult<Self> {
        let name = name.into();
        if self.registrations.iter().any(|r| r.name() == name) {
            return Err(DataLoaderError::DuplicateLoader(name));
        }

        let mut named = NamedBatchLoader::new(name, loader);
        for customizer in &self.customizers {
            customizer.customize(&mut named)?;
        }
        let (name, loader) = named.into_parts();

        debug!(loader = %name, shape = %loader.shape(), "Registered data loader");
        self.registrations.push(Box::new(TypedRegistration {
            name,
            loader,
            options,
            predicate,
        }));
        Ok(self)
    }

    pub fn build(self) -> DataLoaderProvider {
        DataLoaderProvider {
            registrations: self.registrations.into(),
            options: self.options,
            default_predicate: self.default_predicate,
            schedule: self.schedule,
            ticker_mode: self.ticker_mode,
        }
    }
}

impl fmt::Debug for DataLoaderProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaders: Vec<&str> = self.registrations.iter().map(|r| r.name()).collect();
        f.debug_struct("DataLoaderProviderBuilder")
            .field("loaders", &loaders)
            .field("customizers", &self.customizers.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for DataLoaderProviderBuilder {
    fn default() -> Self {
        let config = DataLoaderConfig::default();
        Self {
            customizers: Vec::new(),
            registrations: Vec::new(),
            options: DataLoaderOptions::from_config(&config),
            default_predicate: DispatchPredicate::always(),
            schedule: config.schedule_duration(),
            ticker_mode: config.ticker_mode,
        }
    }
}

/// Builds per-request registries from the registered loaders
#[derive(Clone)]
pub struct DataLoaderProvider {
    registrations: Arc<[Box<dyn Registration>]>,
    options: DataLoaderOptions,
    default_predicate: DispatchPredicate,
    schedule: Duration,
    ticker_mode: bool,
}

impl DataLoaderProvider {
    pub fn builder() -> DataLoaderProviderBuilder {
        DataLoaderProviderBuilder::default()
    }

    /// Names of the registered loaders, in registration order
    pub fn loader_names(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.name()).collect()
    }

    pub fn build_registry(&self) -> DataLoaderResult<DataLoaderRegistry> {
        self.create_registry(None)
    }

    /// Build a registry whose loaders see `context` in their environment
    pub fn build_registry_with_context<T>(&self, context: T) -> DataLoaderResult<DataLoaderRegistry>
    where
        T: Any + Send + Sync,
    {
        self.create_registry(Some(Arc::new(context)))
    }

    fn create_registry(
        &self,
        context: Option<ContextValue>,
    ) -> DataLoaderResult<DataLoaderRegistry> {
        let started = Instant::now();
        let registry = DataLoaderRegistry::builder()
            .default_predicate(self.default_predicate.clone())
            .schedule_duration(self.schedule)
            .ticker_mode(self.ticker_mode)
            .build();

        for registration in self.registrations.iter() {
            registration.register_into(&registry, self.options, context.as_ref())?;
        }
        registry.notify_consumers();

        debug!(
            loaders = registry.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Created data loader registry"
        );
        Ok(registry)
    }
}

impl fmt::Debug for DataLoaderProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaders: Vec<String> = self
            .registrations
            .iter()
            .map(|r| format!("{} ({})", r.name(), r.shape()))
            .collect();
        f.debug_struct("DataLoaderProvider")
            .field("loaders", &loaders)
            .field("options", &self.options)
            .field("ticker_mode", &self.ticker_mode)
            .finish()
    }
}
