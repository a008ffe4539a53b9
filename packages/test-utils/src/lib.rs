//! Shared test utilities for the DGS workspace
//!
//! This crate provides recording instrumentation hooks and small in-memory
//! batch loaders so test suites can exercise data loaders without a backend.
//!
//! # Utilities
//!
//! - [`RecordingInstrumentation`] - Hook that appends dispatches and completions to an
//!   [`EventLog`]
//! - [`RegistryCapturingLoader`] - Loader that records the registry handed to it
//! - [`GatedLoader`] - Loader whose batches settle only once the test opens the gate
//! - [`init_tracing`] - Installs a `tracing` subscriber for debugging tests
//!
//! # Example
//!
//! ```rust,ignore
//! use dgs_test_utils::{EventLog, RecordingInstrumentation};
//!
//! let log = EventLog::new();
//! let hooks = vec![
//!     RecordingInstrumentation::new("H1", &log).into_hook(),
//!     RecordingInstrumentation::new("H2", &log).into_hook(),
//! ];
//! // register an InstrumentationCustomizer with `hooks`, dispatch, then:
//! assert_eq!(log.labels(), ["H1:dispatch", "H2:dispatch", "H2:complete", "H1:complete"]);
//! ```

mod loaders;
mod recording;

pub use loaders::{
    failing_loader, panicking_loader, rejecting_loader, test_error, uppercase_list,
    uppercase_mapped, GatedLoader, RegistryCapture, RegistryCapturingLoader,
};
pub use recording::{EventLog, HookEvent, Outcome, RecordingInstrumentation};

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING: Once = Once::new();

/// Install a fmt subscriber honoring `RUST_LOG`, once per test binary
///
/// Do not call this from a binary whose tests use `#[traced_test]`: both
/// install the global default subscriber and only one can succeed.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "dgs_dataloader=debug".into()),
            )
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
