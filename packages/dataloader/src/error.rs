//! Error types for data loader wiring and batch resolution

use std::sync::Arc;

use thiserror::Error;

/// Failure produced by a batch loader
///
/// Shared so that one failed batch can be handed to every key waiting on
/// it without copying. Callers observe the exact `Arc` the loader returned.
pub type BatchError = Arc<dyn std::error::Error + Send + Sync>;

/// Build a [`BatchError`] from anything convertible into a boxed error
pub fn batch_error<E>(error: E) -> BatchError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boxed: Box<dyn std::error::Error + Send + Sync> = error.into();
    Arc::from(boxed)
}

/// Raised when instrumentation is requested for a loader without context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("data loader `{name}` cannot be instrumented: instrumentation requires a loader that receives the batch environment")]
pub struct DataLoaderInstrumentationError {
    /// Name of the offending loader
    pub name: String,
}

impl DataLoaderInstrumentationError {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Errors surfaced by data loaders, the registry and the provider
#[derive(Error, Debug, Clone)]
pub enum DataLoaderError {
    // ========== Batch Errors ==========
    /// The batch loader failed; every key of the batch sees the same error
    #[error("batch load failed: {0}")]
    Batch(BatchError),

    /// A list loader returned a different number of values than keys
    #[error("data loader `{name}` returned {actual} values for {expected} keys")]
    BatchSizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A mapped loader returned no entry for a requested key
    #[error("data loader `{name}` returned no value for key {key}")]
    MissingKey { name: String, key: String },

    /// The batch was dropped before it settled
    #[error("batch for data loader `{name}` was cancelled before completion")]
    Cancelled { name: String },

    // ========== Configuration Errors ==========
    /// Instrumentation requested for a context-less loader
    #[error(transparent)]
    Instrumentation(#[from] DataLoaderInstrumentationError),

    /// Two loaders registered under the same name
    #[error("multiple data loaders registered under `{0}`")]
    DuplicateLoader(String),

    /// Lookup of a name that was never registered
    #[error("no data loader registered under `{0}`")]
    UnknownLoader(String),

    /// Lookup with key/value types that differ from the registration
    #[error("data loader `{name}` is not a DataLoader<{key_type}, {value_type}>")]
    TypeMismatch {
        name: String,
        key_type: &'static str,
        value_type: &'static str,
    },

    /// Invalid loader or registry configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DataLoaderError {
    /// Check if this error is raised while wiring loaders rather than
    /// while resolving a batch
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Instrumentation(_)
                | Self::DuplicateLoader(_)
                | Self::UnknownLoader(_)
                | Self::TypeMismatch { .. }
                | Self::Configuration(_)
        )
    }

    /// Name of the loader the error refers to, when known
    pub fn loader_name(&self) -> Option<&str> {
        match self {
            Self::BatchSizeMismatch { name, .. }
            | Self::MissingKey { name, .. }
            | Self::Cancelled { name }
            | Self::TypeMismatch { name, .. }
            | Self::DuplicateLoader(name)
            | Self::UnknownLoader(name) => Some(name.as_str()),
            Self::Instrumentation(err) => Some(err.name.as_str()),
            Self::Batch(_) | Self::Configuration(_) => None,
        }
    }

    /// The original batch failure, if this error carries one
    pub fn batch_source(&self) -> Option<&BatchError> {
        match self {
            Self::Batch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<dgs_shared_config::ConfigError> for DataLoaderError {
    fn from(err: dgs_shared_config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type alias for data loader operations
pub type DataLoaderResult<T> = Result<T, DataLoaderError>;
