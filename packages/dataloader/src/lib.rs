//! Batched data loading with instrumentation hooks
//!
//! Batch loaders resolve many keys in one call. A [`DataLoader`] queues the
//! keys requested during a request and hands them to its batch loader when
//! dispatched; a [`DataLoaderRegistry`] holds the loaders of one request and
//! dispatches them together.
//!
//! Loaders are registered once through [`DataLoaderProvider`], where
//! customizers can wrap them. [`InstrumentationCustomizer`] wraps each loader
//! in an [`InstrumentationDriver`] so that [`DataLoaderInstrumentation`]
//! hooks observe every batch: dispatch notifications in registration order,
//! completion notifications in reverse order, with hook failures contained.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dgs_dataloader::{
//!     BatchError, DataLoaderInstrumentation, DataLoaderProvider, FnBatchLoader,
//!     InstrumentationCustomizer, Listed, NoContext, TracingInstrumentation,
//!     WrapWithContextCustomizer,
//! };
//!
//! # async fn run() -> Result<(), dgs_dataloader::DataLoaderError> {
//! let hooks = [Arc::new(TracingInstrumentation::new()) as Arc<dyn DataLoaderInstrumentation>];
//! let provider = DataLoaderProvider::builder()
//!     .customizer(WrapWithContextCustomizer)
//!     .customizer(InstrumentationCustomizer::new(hooks))
//!     .register(
//!         "squares",
//!         FnBatchLoader::<Listed, NoContext, _>::new(|keys: Vec<u64>, _env: ()| async move {
//!             Ok::<_, BatchError>(keys.iter().map(|k| k * k).collect::<Vec<u64>>())
//!         }),
//!     )?
//!     .build();
//!
//! let registry = provider.build_registry()?;
//! let squares = registry.get::<u64, u64>("squares")?;
//! let nine = squares.load(3);
//! registry.dispatch_all().await;
//! assert_eq!(nine.await?, 9);
//! # Ok(())
//! # }
//! ```

mod customizer;
mod data_loader;
mod environment;
mod error;
mod instrumentation;
mod loader;
mod provider;
mod registry;
mod statistics;

pub use customizer::{
    CustomizableLoader, DataLoaderCustomizer, InstrumentationCustomizer, NamedBatchLoader,
    WithContextWrapper, WrapWithContextCustomizer,
};
pub use data_loader::{DataLoader, DataLoaderOptions, LoadFuture};
pub use environment::{BatchLoaderEnvironment, ContextValue};
pub use error::{
    batch_error, BatchError, DataLoaderError, DataLoaderInstrumentationError, DataLoaderResult,
};
pub use instrumentation::{
    noop_context, BatchOutcome, DataLoaderInstrumentation, DataLoaderInstrumentationContext,
    InstrumentationDriver, InstrumentationHooks, SimpleDataLoaderInstrumentation,
    SimpleInstrumentationAdapter, TracingInstrumentation,
};
pub use loader::{
    AnyBatchLoader, BatchFuture, BatchKind, BatchLoader, BatchMode, BatchValues, ContextMode,
    DispatchKey, Env, FnBatchLoader, Keys, Listed, LoaderKey, LoaderShape, LoaderValue, Mapped,
    NoContext, Values, WithContext,
};
pub use provider::{DataLoaderProvider, DataLoaderProviderBuilder};
pub use registry::{
    DataLoaderRegistry, DataLoaderRegistryBuilder, DataLoaderRegistryConsumer, DispatchPredicate,
    LoaderStatus, TickerHandle, WeakDataLoaderRegistry,
};
pub use statistics::Statistics;
