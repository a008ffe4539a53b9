use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{BatchOutcome, DataLoaderInstrumentation, DataLoaderInstrumentationContext};
use crate::environment::BatchLoaderEnvironment;
use crate::loader::DispatchKey;

/// Built-in hook that logs every batch with its size and duration
///
/// Batches slower than the configured threshold are logged at `warn`.
#[derive(Debug, Clone, Default)]
pub struct TracingInstrumentation {
    slow_batch_threshold: Option<Duration>,
}

impl TracingInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slow_batch_threshold(mut self, threshold: Duration) -> Self {
        self.slow_batch_threshold = Some(threshold);
        self
    }
}

impl DataLoaderInstrumentation for TracingInstrumentation {
    fn on_dispatch(
        &self,
        name: &str,
        keys: &[&dyn DispatchKey],
        _environment: &BatchLoaderEnvironment,
    ) -> Box<dyn DataLoaderInstrumentationContext> {
        debug!(loader = %name, keys = keys.len(), "Dispatching batch");
        Box::new(BatchTimer {
            name: name.to_string(),
            keys: keys.len(),
            started: Instant::now(),
            slow_batch_threshold: self.slow_batch_threshold,
        })
    }
}

struct BatchTimer {
    name: String,
    keys: usize,
    started: Instant,
    slow_batch_threshold: Option<Duration>,
}

impl DataLoaderInstrumentationContext for BatchTimer {
    fn on_complete(self: Box<Self>, outcome: BatchOutcome<'_>) {
        let elapsed = self.started.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match outcome {
            Ok(values) => debug!(
                loader = %self.name,
                keys = self.keys,
                values = values.len(),
                elapsed_ms,
                "Batch completed"
            ),
            Err(err) => debug!(
                loader = %self.name,
                keys = self.keys,
                elapsed_ms,
                error = %err,
                "Batch failed"
            ),
        }

        if let Some(threshold) = self.slow_batch_threshold {
            if elapsed > threshold {
                warn!(
                    loader = %self.name,
                    keys = self.keys,
                    elapsed_ms,
                    threshold_ms = threshold.as_millis() as u64,
                    "Slow batch"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::batch_error;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_logs_dispatch_and_completion() {
        let hook = TracingInstrumentation::new();
        let keys: [&dyn DispatchKey; 1] = [&"a"];
        let values = vec!["A"];

        hook.on_dispatch("letters", &keys, &BatchLoaderEnvironment::default())
            .on_complete(Ok(&values));

        assert!(logs_contain("Dispatching batch"));
        assert!(logs_contain("Batch completed"));
        assert!(logs_contain("loader=letters"));
    }

    #[traced_test]
    #[test]
    fn test_logs_failure_and_slow_batch() {
        let hook = TracingInstrumentation::new().with_slow_batch_threshold(Duration::ZERO);
        let keys: [&dyn DispatchKey; 1] = [&"a"];
        let failure = batch_error("timeout talking to backend");

        let context = hook.on_dispatch("letters", &keys, &BatchLoaderEnvironment::default());
        std::thread::sleep(Duration::from_millis(2));
        context.on_complete(Err(&failure));

        assert!(logs_contain("Batch failed"));
        assert!(logs_contain("timeout talking to backend"));
        assert!(logs_contain("Slow batch"));
    }
}
