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

// Store factory for creating stores from configuration

use super::backend::Store;
use super::bucket::BucketStore;
use super::fallback::BucketFallbackStore;
use super::filesystem::FileStore;
use super::network::NetworkStore;
use super::null::NullStore;
use crate::config::StoreConf;
use anyhow::{bail, Result};

pub struct StoreFactory;

impl StoreFactory {
    /// Create and configure a store from its section
    ///
    /// `parent` is the enclosing store section; keys missing from `conf` are
    /// looked up there.
    pub fn create(
        conf: &StoreConf,
        category: &str,
        multi_category: bool,
        parent: Option<&StoreConf>,
    ) -> Result<Box<dyn Store>> {
        let Some(store_type) = conf.store_type() else {
            bail!("[{}] store section has no 'type'", category);
        };

        let mut store: Box<dyn Store> = match store_type.as_str() {
            "file" => Box::new(FileStore::new(category, multi_category)),
            "network" => Box::new(NetworkStore::new(category, multi_category)),
            "null" => Box::new(NullStore::new(category, multi_category)),
            "bucket" => Box::new(BucketStore::new(category, multi_category)),
            "bucket_fallback" => Box::new(BucketFallbackStore::new(category, multi_category)),
            unknown => bail!(
                "Unknown store type: '{}'. Supported: file, network, null, bucket, bucket_fallback",
                unknown
            ),
        };

        store.configure(conf, parent);
        Ok(store)
    }
}
