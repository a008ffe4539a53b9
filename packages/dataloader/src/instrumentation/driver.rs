use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::FutureExt;
use tracing::{debug, warn};

use super::{panic_message, BatchOutcome, DataLoaderInstrumentationContext, InstrumentationHooks};
use crate::environment::BatchLoaderEnvironment;
use crate::error::{BatchError, DataLoaderError};
use crate::loader::{
    BatchFuture, BatchLoader, BatchMode, BatchValues, DispatchKey, Keys, LoaderKey, LoaderValue,
    Values, WithContext,
};
use crate::registry::{DataLoaderRegistry, DataLoaderRegistryConsumer};

/// Wraps a loader that receives the batch environment so every batch is
/// reported to the registered hooks
///
/// Works for list and mapped loaders alike. The wrapped loader is called
/// with the same keys and environment, and its result is returned as is.
pub struct InstrumentationDriver<K: LoaderKey, V: LoaderValue, M: BatchMode> {
    name: Arc<str>,
    original: Arc<dyn BatchLoader<K, V, Mode = M, Context = WithContext>>,
    hooks: InstrumentationHooks,
}

impl<K: LoaderKey, V: LoaderValue, M: BatchMode> InstrumentationDriver<K, V, M> {
    pub fn new(
        name: impl Into<Arc<str>>,
        original: Arc<dyn BatchLoader<K, V, Mode = M, Context = WithContext>>,
        hooks: impl Into<InstrumentationHooks>,
    ) -> Self {
        Self {
            name: name.into(),
            original,
            hooks: hooks.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hooks(&self) -> &InstrumentationHooks {
        &self.hooks
    }

    pub fn original(&self) -> &Arc<dyn BatchLoader<K, V, Mode = M, Context = WithContext>> {
        &self.original
    }

    /// Notify every hook in registration order, keeping each context with
    /// the index of the hook that returned it
    fn dispatch_hooks(
        &self,
        keys: &Keys<M, K>,
        environment: &BatchLoaderEnvironment,
    ) -> Vec<(usize, Box<dyn DataLoaderInstrumentationContext>)> {
        let keys: Vec<&dyn DispatchKey> = M::key_refs(keys)
            .into_iter()
            .map(|key| key as &dyn DispatchKey)
            .collect();

        let mut contexts = Vec::with_capacity(self.hooks.len());
        for (index, hook) in self.hooks.iter().enumerate() {
            let dispatched = panic::catch_unwind(AssertUnwindSafe(|| {
                hook.on_dispatch(&self.name, &keys, environment)
            }));
            match dispatched {
                Ok(context) => contexts.push((index, context)),
                Err(payload) => warn!(
                    loader = %self.name,
                    hook = index,
                    error = panic_message(&*payload),
                    "Instrumentation hook panicked on dispatch, skipping it for this batch"
                ),
            }
        }
        contexts
    }
}

impl<K: LoaderKey, V: LoaderValue, M: BatchMode> BatchLoader<K, V>
    for InstrumentationDriver<K, V, M>
{
    type Mode = M;
    type Context = WithContext;

    fn load(
        &self,
        keys: Keys<M, K>,
        environment: BatchLoaderEnvironment,
    ) -> BatchFuture<Values<M, K, V>> {
        // Armed before the loader runs; unwinding out of `load` completes the hooks
        let guard = CompletionGuard {
            name: Arc::clone(&self.name),
            contexts: self.dispatch_hooks(&keys, &environment),
        };
        let pending = self.original.load(keys, environment);

        async move {
            let result = pending.await;
            guard.complete(match &result {
                Ok(values) => Ok(values as &dyn BatchValues),
                Err(err) => Err(err),
            });
            result
        }
        .boxed()
    }

    fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer> {
        self.original
            .registry_consumer()
            .map(|_| self as &dyn DataLoaderRegistryConsumer)
    }
}

impl<K: LoaderKey, V: LoaderValue, M: BatchMode> DataLoaderRegistryConsumer
    for InstrumentationDriver<K, V, M>
{
    fn set_data_loader_registry(&self, registry: &DataLoaderRegistry) {
        if let Some(consumer) = self.original.registry_consumer() {
            consumer.set_data_loader_registry(registry);
        }
    }
}

impl<K: LoaderKey, V: LoaderValue, M: BatchMode> fmt::Debug for InstrumentationDriver<K, V, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationDriver")
            .field("name", &self.name)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Contexts of one in-flight batch
///
/// Dropping the guard before `complete` reports the batch as cancelled.
struct CompletionGuard {
    name: Arc<str>,
    contexts: Vec<(usize, Box<dyn DataLoaderInstrumentationContext>)>,
}

impl CompletionGuard {
    fn complete(mut self, outcome: BatchOutcome<'_>) {
        self.notify(outcome);
    }

    fn notify(&mut self, outcome: BatchOutcome<'_>) {
        while let Some((hook, context)) = self.contexts.pop() {
            let completed =
                panic::catch_unwind(AssertUnwindSafe(move || context.on_complete(outcome)));
            if let Err(payload) = completed {
                warn!(
                    loader = %self.name,
                    hook,
                    error = panic_message(&*payload),
                    "Instrumentation context panicked on completion"
                );
            }
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.contexts.is_empty() {
            return;
        }
        debug!(loader = %self.name, "Batch dropped before completion");
        let cancelled: BatchError = Arc::new(DataLoaderError::Cancelled {
            name: self.name.to_string(),
        });
        self.notify(Err(&cancelled));
    }
}
