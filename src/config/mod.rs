// Configuration module for log-relay
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values
// - Lenient store sections read by each store's configure()

pub mod types;
mod loader;
mod store_conf;

pub use types::*;
pub use loader::ConfigLoader;
pub use store_conf::StoreConf;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    let mut config = load_config(path)?;

    if let Ok(level) = std::env::var("RELAY_LOG_LEVEL") {
        config.logging.level = level;
    }

    if let Ok(interval) = std::env::var("RELAY_CHECK_INTERVAL") {
        match interval.parse::<u64>() {
            Ok(secs) if secs > 0 => config.relay.check_interval_seconds = secs,
            _ => warn!("Ignoring invalid RELAY_CHECK_INTERVAL '{}'", interval),
        }
    }

    Ok(config)
}
