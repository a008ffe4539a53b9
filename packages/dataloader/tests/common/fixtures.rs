//! Test fixtures for data loader integration tests
//!
//! Provides hook sets, provider builders and polling helpers.

use std::sync::Arc;
use std::time::Duration;

use dgs_dataloader::{
    AnyBatchLoader, DataLoaderInstrumentation, DataLoaderProvider, DataLoaderRegistry,
    DataLoaderResult, InstrumentationCustomizer, LoaderKey, LoaderValue, WrapWithContextCustomizer,
};
use dgs_test_utils::{EventLog, RecordingInstrumentation};

/// Recording hooks labelled `labels`, in order, all writing to `log`
pub fn recording_hooks(labels: &[&str], log: &EventLog) -> Vec<Arc<dyn DataLoaderInstrumentation>> {
    labels
        .iter()
        .map(|label| RecordingInstrumentation::new(*label, log).into_hook())
        .collect()
}

/// Registry holding one loader instrumented with `hooks`
pub fn instrumented_registry<K: LoaderKey, V: LoaderValue>(
    name: &str,
    loader: AnyBatchLoader<K, V>,
    hooks: Vec<Arc<dyn DataLoaderInstrumentation>>,
) -> DataLoaderResult<DataLoaderRegistry> {
    DataLoaderProvider::builder()
        .customizer(WrapWithContextCustomizer)
        .customizer(InstrumentationCustomizer::new(hooks))
        .register_any(name, loader, None, None)?
        .build()
        .build_registry()
}

/// Poll `condition` every millisecond until it holds or `timeout` passes
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Sorted `(key, value)` pairs of a keyed result, for comparisons
pub fn sorted_pairs(values: &std::collections::HashMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    pairs.sort();
    pairs
}
