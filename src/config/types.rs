// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for log-relay

use super::store_conf::StoreConf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub categories: Vec<CategoryConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.category == name)
    }
}

/// Relay-wide queue and maintenance settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    /// Seconds between periodic_check ticks on every store
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// Seconds to wait before re-sending a batch a store rejected
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,

    /// Bytes a category may have queued before callers are told to try later
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            retry_interval_seconds: default_retry_interval(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl RelaySettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }
}

/// One store tree and the category (or category pattern) it serves
///
/// `default` is the model for categories with no other match, and a name
/// ending in `*` is a prefix model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryConfig {
    pub category: String,

    /// Share one store instance across every category this entry matches
    /// instead of copying the store per category
    #[serde(default)]
    pub multi_category: bool,

    pub store: StoreConf,
}

impl CategoryConfig {
    pub fn is_default(&self) -> bool {
        self.category == "default"
    }

    pub fn prefix(&self) -> Option<&str> {
        self.category.strip_suffix('*')
    }

    pub fn is_model(&self) -> bool {
        self.is_default() || self.prefix().is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_check_interval() -> u64 { 5 }
fn default_retry_interval() -> u64 { 30 }
fn default_max_queue_size() -> usize { 5_000_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
