//! Shared configuration types for DGS services
//!
//! This crate provides the configuration consumed by the data loader
//! runtime: scheduler timing for the loader registry and the default
//! batching/caching options applied to every registered loader.

mod dataloader;
mod error;

pub use dataloader::DataLoaderConfig;
pub use error::{ConfigError, ConfigResult};

use std::env;

/// Configuration read once at service startup
#[derive(Debug, Clone, Default)]
pub struct DgsConfig {
    /// Data loader registry and loader defaults
    pub dataloader: DataLoaderConfig,
}

impl DgsConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let dataloader = DataLoaderConfig::from_env()?;
        dataloader.validate()?;

        Ok(Self { dataloader })
    }

    /// Load a `.env` file (if present) and then read the environment
    pub fn load() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }
}

/// Helper function to parse an environment variable into a specific type
pub fn parse_env<T>(name: &str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

/// Helper function to parse a boolean flag
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case.
pub fn parse_bool_env(name: &str, default: bool) -> ConfigResult<bool> {
    match env::var(name) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("expected a boolean, got '{}'", other),
            )),
        },
        Err(_) => Ok(default),
    }
}
