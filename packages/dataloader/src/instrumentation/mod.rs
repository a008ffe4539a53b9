//! Batch instrumentation
//!
//! Hooks observe every batch of an instrumented loader. For one batch the
//! driver calls [`DataLoaderInstrumentation::on_dispatch`] on each hook in
//! registration order before the loader runs, then calls
//! [`DataLoaderInstrumentationContext::on_complete`] on the returned
//! contexts in reverse order once the batch settles. Hooks only observe:
//! the value or error seen by callers is the one the loader produced.

mod driver;
mod simple;
mod timing;

pub use driver::InstrumentationDriver;
pub use simple::{SimpleDataLoaderInstrumentation, SimpleInstrumentationAdapter};
pub use timing::TracingInstrumentation;

use std::any::Any;
use std::sync::Arc;

use crate::environment::BatchLoaderEnvironment;
use crate::error::BatchError;
use crate::loader::{BatchValues, DispatchKey};

/// How a batch settled, as seen by hooks
pub type BatchOutcome<'a> = Result<&'a dyn BatchValues, &'a BatchError>;

/// Ordered hook list shared by every instrumented loader
pub type InstrumentationHooks = Arc<[Arc<dyn DataLoaderInstrumentation>]>;

/// Observer notified when an instrumented loader dispatches a batch
///
/// `on_dispatch` runs synchronously on the thread dispatching the batch and
/// must not block.
pub trait DataLoaderInstrumentation: Send + Sync + 'static {
    fn on_dispatch(
        &self,
        name: &str,
        keys: &[&dyn DispatchKey],
        environment: &BatchLoaderEnvironment,
    ) -> Box<dyn DataLoaderInstrumentationContext>;
}

/// Per-batch state returned by a hook, finalized exactly once
///
/// `on_complete` runs on whichever thread settles the batch.
pub trait DataLoaderInstrumentationContext: Send {
    fn on_complete(self: Box<Self>, outcome: BatchOutcome<'_>);
}

impl<F> DataLoaderInstrumentationContext for F
where
    F: for<'a> FnOnce(BatchOutcome<'a>) + Send,
{
    fn on_complete(self: Box<Self>, outcome: BatchOutcome<'_>) {
        (*self)(outcome)
    }
}

/// Context for hooks that have nothing to do on completion
pub fn noop_context() -> Box<dyn DataLoaderInstrumentationContext> {
    Box::new(|_: BatchOutcome<'_>| {})
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
