use std::sync::Arc;

use super::{BatchOutcome, DataLoaderInstrumentation, DataLoaderInstrumentationContext};
use crate::environment::BatchLoaderEnvironment;
use crate::loader::DispatchKey;

/// Before/after style instrumentation with a typed context
///
/// Whatever `before_load` returns is handed back to `after_load` for the
/// same batch. Register it through [`SimpleInstrumentationAdapter`].
pub trait SimpleDataLoaderInstrumentation: Send + Sync + 'static {
    type Context: Send + 'static;

    fn before_load(
        &self,
        name: &str,
        keys: &[&dyn DispatchKey],
        environment: &BatchLoaderEnvironment,
    ) -> Self::Context;

    fn after_load(&self, name: &str, outcome: BatchOutcome<'_>, context: Self::Context);
}

/// Runs a [`SimpleDataLoaderInstrumentation`] as a regular hook
pub struct SimpleInstrumentationAdapter<I> {
    inner: Arc<I>,
}

impl<I: SimpleDataLoaderInstrumentation> SimpleInstrumentationAdapter<I> {
    pub fn new(instrumentation: I) -> Self {
        Self {
            inner: Arc::new(instrumentation),
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<I: SimpleDataLoaderInstrumentation> From<I> for SimpleInstrumentationAdapter<I> {
    fn from(instrumentation: I) -> Self {
        Self::new(instrumentation)
    }
}

impl<I: SimpleDataLoaderInstrumentation> DataLoaderInstrumentation
    for SimpleInstrumentationAdapter<I>
{
    fn on_dispatch(
        &self,
        name: &str,
        keys: &[&dyn DispatchKey],
        environment: &BatchLoaderEnvironment,
    ) -> Box<dyn DataLoaderInstrumentationContext> {
        let context = self.inner.before_load(name, keys, environment);
        Box::new(SimpleContext {
            instrumentation: Arc::clone(&self.inner),
            name: name.to_string(),
            context,
        })
    }
}

struct SimpleContext<I: SimpleDataLoaderInstrumentation> {
    instrumentation: Arc<I>,
    name: String,
    context: I::Context,
}

impl<I: SimpleDataLoaderInstrumentation> DataLoaderInstrumentationContext for SimpleContext<I> {
    fn on_complete(self: Box<Self>, outcome: BatchOutcome<'_>) {
        let SimpleContext {
            instrumentation,
            name,
            context,
        } = *self;
        instrumentation.after_load(&name, outcome, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::batch_error;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct BatchSizes {
        completed: Mutex<Vec<(String, usize, bool)>>,
    }

    impl SimpleDataLoaderInstrumentation for BatchSizes {
        type Context = (Instant, usize);

        fn before_load(
            &self,
            _name: &str,
            keys: &[&dyn DispatchKey],
            _environment: &BatchLoaderEnvironment,
        ) -> Self::Context {
            (Instant::now(), keys.len())
        }

        fn after_load(&self, name: &str, outcome: BatchOutcome<'_>, context: Self::Context) {
            let (started, keys) = context;
            assert!(started.elapsed().as_secs() < 60);
            self.completed
                .lock()
                .unwrap()
                .push((name.to_string(), keys, outcome.is_ok()));
        }
    }

    #[test]
    fn test_context_round_trips_to_after_load() {
        let adapter = SimpleInstrumentationAdapter::new(BatchSizes::default());
        let keys: [&dyn DispatchKey; 2] = [&1u32, &2u32];

        let context = adapter.on_dispatch("numbers", &keys, &BatchLoaderEnvironment::default());
        let values = vec![10u32, 20u32];
        context.on_complete(Ok(&values));

        let failure = batch_error("down");
        adapter
            .on_dispatch("numbers", &keys[..1], &BatchLoaderEnvironment::default())
            .on_complete(Err(&failure));

        assert_eq!(
            *adapter.inner().completed.lock().unwrap(),
            vec![
                ("numbers".to_string(), 2, true),
                ("numbers".to_string(), 1, false)
            ]
        );
    }
}
