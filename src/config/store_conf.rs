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

// Untyped store configuration sections
//
// Store sections are polymorphic (every store type reads its own keys and
// nested sections), so they are kept as a YAML mapping and read through
// lenient getters. A getter never fails: a missing key is `None`, a key with
// the wrong shape is logged and treated as missing so the caller falls back
// to its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StoreConf {
    values: Mapping,
}

impl StoreConf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a store section from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse store configuration")
    }

    /// Set a scalar value, replacing any previous one
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.values.insert(Value::String(key.to_string()), value.into());
        self
    }

    /// Set a nested store section
    pub fn set_store(&mut self, key: &str, store: StoreConf) -> &mut Self {
        self.values
            .insert(Value::String(key.to_string()), Value::Mapping(store.values));
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn store_type(&self) -> Option<String> {
        self.get_string("type")
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => None,
            _ => {
                warn!("Config key '{}' is not a scalar, ignoring", key);
                None
            }
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| {
                warn!("Config key '{}' is not an integer: {}", key, n);
                None
            }),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Config key '{}' is not an integer: '{}'", key, s);
                    None
                }
            },
            Value::Null => None,
            _ => {
                warn!("Config key '{}' is not an integer, ignoring", key);
                None
            }
        }
    }

    /// Accepts YAML booleans plus the yes/no, on/off and 1/0 spellings
    /// found in older relay configs
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => {
                    warn!("Config key '{}' is not a boolean: {}", key, n);
                    None
                }
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "on" | "1" => Some(true),
                "no" | "false" | "off" | "0" => Some(false),
                _ => {
                    warn!("Config key '{}' is not a boolean: '{}'", key, s);
                    None
                }
            },
            Value::Null => None,
            _ => {
                warn!("Config key '{}' is not a boolean, ignoring", key);
                None
            }
        }
    }

    /// Nested store section, if present and a mapping
    pub fn get_store(&self, key: &str) -> Option<StoreConf> {
        match self.values.get(key)? {
            Value::Mapping(m) => Some(StoreConf { values: m.clone() }),
            Value::Null => None,
            _ => {
                warn!("Config key '{}' is not a store section, ignoring", key);
                None
            }
        }
    }

    /// Copy of this section with the parent's scalar values filled in for keys
    /// not set locally. `type` and nested sections are never inherited.
    pub fn inherit(&self, parent: Option<&StoreConf>) -> StoreConf {
        let mut merged = self.clone();
        if let Some(parent) = parent {
            for (key, value) in parent.values.iter() {
                if key.as_str() == Some("type") || value.is_mapping() {
                    continue;
                }
                if !merged.values.contains_key(key) {
                    merged.values.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }
}
