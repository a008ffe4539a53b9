//! In-memory batch loaders for data loader tests

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dgs_dataloader::{
    batch_error, BatchError, BatchFuture, BatchLoader, BatchLoaderEnvironment, ContextMode,
    DataLoaderRegistry, DataLoaderRegistryConsumer, Env, FnBatchLoader, Listed, Mapped,
    WeakDataLoaderRegistry, WithContext,
};
use futures_util::future::Ready;
use futures_util::FutureExt;
use tokio::sync::Semaphore;

/// Build a batch error the way a failing backend would report one
pub fn test_error(message: &str) -> BatchError {
    batch_error(anyhow::anyhow!("{}", message))
}

/// List loader mapping every key to its uppercase form
pub fn uppercase_list() -> impl BatchLoader<String, String, Mode = Listed, Context = WithContext> {
    FnBatchLoader::<Listed, WithContext, _>::new(
        |keys: Vec<String>, _env: BatchLoaderEnvironment| async move {
            Ok::<_, BatchError>(keys.iter().map(|k| k.to_uppercase()).collect::<Vec<_>>())
        },
    )
}

/// Mapped loader mapping every key to its uppercase form
pub fn uppercase_mapped() -> impl BatchLoader<String, String, Mode = Mapped, Context = WithContext>
{
    FnBatchLoader::<Mapped, WithContext, _>::new(
        |keys: HashSet<String>, _env: BatchLoaderEnvironment| async move {
            let values: HashMap<String, String> = keys
                .into_iter()
                .map(|k| {
                    let v = k.to_uppercase();
                    (k, v)
                })
                .collect();
            Ok::<_, BatchError>(values)
        },
    )
}

/// List loader whose every batch fails with `error`
pub fn failing_loader(
    error: BatchError,
) -> impl BatchLoader<String, String, Mode = Listed, Context = WithContext> {
    FnBatchLoader::<Listed, WithContext, _>::new(
        move |_keys: Vec<String>, _env: BatchLoaderEnvironment| {
            let error = error.clone();
            async move { Err::<Vec<String>, _>(error) }
        },
    )
}

/// List loader whose batch future panics with `message` when polled
pub fn panicking_loader(
    message: &'static str,
) -> impl BatchLoader<String, String, Mode = Listed, Context = WithContext> {
    FnBatchLoader::<Listed, WithContext, _>::new(
        move |keys: Vec<String>, _env: BatchLoaderEnvironment| async move {
            if !keys.is_empty() {
                panic!("{}", message);
            }
            Ok::<_, BatchError>(keys)
        },
    )
}

/// List loader that panics with `message` before returning a future
pub fn rejecting_loader(
    message: &'static str,
) -> impl BatchLoader<String, String, Mode = Listed, Context = WithContext> {
    FnBatchLoader::<Listed, WithContext, _>::new(
        move |_keys: Vec<String>,
              _env: BatchLoaderEnvironment|
              -> Ready<Result<Vec<String>, BatchError>> { panic!("{}", message) },
    )
}

#[derive(Default)]
struct CaptureState {
    registry: Option<WeakDataLoaderRegistry>,
    times_set: usize,
}

/// Observes what a [`RegistryCapturingLoader`] was given
///
/// Only a weak handle is kept so the loader does not keep its own registry
/// alive.
#[derive(Clone, Default)]
pub struct RegistryCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl RegistryCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last registry handed to the loader, if still alive
    pub fn registry(&self) -> Option<DataLoaderRegistry> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .registry
            .as_ref()
            .and_then(WeakDataLoaderRegistry::upgrade)
    }

    pub fn times_set(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).times_set
    }
}

/// Uppercasing list loader that asks for its registry
///
/// `C` selects whether it receives the batch environment.
pub struct RegistryCapturingLoader<C = WithContext> {
    capture: RegistryCapture,
    _context: PhantomData<fn() -> C>,
}

impl<C: ContextMode> RegistryCapturingLoader<C> {
    pub fn new(capture: &RegistryCapture) -> Self {
        Self {
            capture: capture.clone(),
            _context: PhantomData,
        }
    }
}

impl<C: ContextMode> BatchLoader<String, String> for RegistryCapturingLoader<C> {
    type Mode = Listed;
    type Context = C;

    fn load(&self, keys: Vec<String>, _environment: Env<C>) -> BatchFuture<Vec<String>> {
        let values: Vec<String> = keys.iter().map(|k| k.to_uppercase()).collect();
        async move { Ok(values) }.boxed()
    }

    fn registry_consumer(&self) -> Option<&dyn DataLoaderRegistryConsumer> {
        Some(self)
    }
}

impl<C: ContextMode> DataLoaderRegistryConsumer for RegistryCapturingLoader<C> {
    fn set_data_loader_registry(&self, registry: &DataLoaderRegistry) {
        let mut state = self.capture.state.lock().unwrap_or_else(|e| e.into_inner());
        state.registry = Some(registry.downgrade());
        state.times_set += 1;
    }
}

/// Mapped loader whose batches settle only after [`GatedLoader::open`]
///
/// Lets tests observe the state between dispatch and completion.
#[derive(Clone)]
pub struct GatedLoader {
    gate: Arc<Semaphore>,
    opened: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl GatedLoader {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            opened: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let every pending and future batch settle
    pub fn open(&self) {
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.gate.add_permits(1);
        }
    }

    /// Number of batches started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for GatedLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchLoader<String, String> for GatedLoader {
    type Mode = Mapped;
    type Context = WithContext;

    fn load(
        &self,
        keys: HashSet<String>,
        _environment: BatchLoaderEnvironment,
    ) -> BatchFuture<HashMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = Arc::clone(&self.gate);
        async move {
            let _permit = gate.acquire().await.map_err(batch_error)?;
            let values: HashMap<String, String> = keys
                .into_iter()
                .map(|k| {
                    let v = k.to_uppercase();
                    (k, v)
                })
                .collect();
            Ok::<_, BatchError>(values)
        }
        .boxed()
    }
}
