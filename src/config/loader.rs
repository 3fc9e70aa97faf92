// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

const STORE_TYPES: &[&str] = &["file", "network", "null", "bucket", "bucket_fallback"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::load_str(&content)
    }

    /// Parse and validate configuration text
    pub fn load_str(content: &str) -> Result<RelayConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: RelayConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${LOG_ROOT:-/var/log/relay} -> /var/log/relay (if LOG_ROOT not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });

        Ok(substituted.to_string())
    }

    /// Validate configuration
    ///
    /// Only structural problems are rejected here. Store options are lenient
    /// and fall back to defaults when the store configures itself.
    pub(crate) fn validate(config: &RelayConfig) -> Result<()> {
        if config.relay.check_interval_seconds == 0 {
            bail!("relay.check_interval_seconds must be > 0");
        }

        if config.relay.retry_interval_seconds == 0 {
            bail!("relay.retry_interval_seconds must be > 0");
        }

        if config.relay.max_queue_size == 0 {
            bail!("relay.max_queue_size must be > 0");
        }

        if config.categories.is_empty() {
            bail!("at least one category must be configured");
        }

        let mut seen = HashSet::new();
        for category in &config.categories {
            if category.category.is_empty() {
                bail!("category name cannot be empty");
            }
            if !seen.insert(category.category.as_str()) {
                bail!("category '{}' is configured twice", category.category);
            }
            match category.store.store_type() {
                Some(store_type) if STORE_TYPES.contains(&store_type.as_str()) => {}
                Some(unknown) => bail!(
                    "category '{}': unknown store type '{}'. Supported: {}",
                    category.category,
                    unknown,
                    STORE_TYPES.join(", ")
                ),
                None => bail!("category '{}': store type missing", category.category),
            }
        }

        Ok(())
    }
}
