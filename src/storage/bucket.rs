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

// Bucket store: shards messages across child stores by routing key

use super::backend::{HandleResult, Store, StoreCore, Unhandled};
use super::bucketize::{BucketType, Bucketizer};
use super::factory::StoreFactory;
use crate::config::StoreConf;
use crate::message::{LogEntry, LogEntryPtr, MessageBatch};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DEFAULT_BUCKET_SUBDIR: &str = "bucket";

/// Partitions each batch by bucket and hands every sub-batch to its child
/// store. A failing child is not retried; its messages are returned.
pub struct BucketStore {
    core: StoreCore,
    bucketizer: Bucketizer,
    buckets: Vec<Box<dyn Store>>,
    num_buckets: usize,
    opened: bool,
}

impl BucketStore {
    pub fn new(category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(category, "bucket", multi_category),
            bucketizer: Bucketizer::new(BucketType::KeyHash),
            buckets: Vec::new(),
            num_buckets: 0,
            opened: false,
        }
    }

    /// Store over already built children. `buckets[0]` is the default bucket,
    /// so `n` hash buckets need `n + 1` children.
    pub fn with_buckets(category: &str, bucketizer: Bucketizer, buckets: Vec<Box<dyn Store>>) -> Self {
        Self {
            core: StoreCore::new(category, "bucket", false),
            bucketizer,
            num_buckets: buckets.len().saturating_sub(1),
            buckets,
            opened: false,
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn bucketizer(&self) -> &Bucketizer {
        &self.bucketizer
    }

    pub fn bucket(&self, index: usize) -> Option<&dyn Store> {
        self.buckets.get(index).map(|b| b.as_ref())
    }

    /// Same configuration for another category, children included
    pub fn copy_for(&self, category: &str) -> Self {
        Self {
            core: StoreCore::new(category, "bucket", self.core.multi_category()),
            bucketizer: self.bucketizer.clone(),
            buckets: self.buckets.iter().map(|b| b.copy(category)).collect(),
            num_buckets: self.num_buckets,
            opened: false,
        }
    }
}

#[async_trait]
impl Store for BucketStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StoreCore {
        &mut self.core
    }

    fn configure(&mut self, conf: &StoreConf, parent: Option<&StoreConf>) {
        let conf = conf.inherit(parent);
        let category = self.core.category().to_string();
        self.bucketizer.configure(&conf, &category);

        match create_buckets(&conf, &category, self.core.multi_category()) {
            Ok(buckets) => {
                self.num_buckets = buckets.len() - 1;
                self.buckets = buckets;
                info!(
                    "[{}] Bucket store configured with {} buckets ({})",
                    category,
                    self.num_buckets,
                    self.bucketizer.bucket_type()
                );
            }
            Err(e) => {
                error!("[{}] Bad config - {:#}", category, e);
                self.buckets.clear();
                self.num_buckets = 0;
                self.set_status("Bad config for bucket store");
            }
        }
    }

    async fn open(&mut self) -> Result<()> {
        for index in 0..self.buckets.len() {
            if let Err(e) = self.buckets[index].open().await {
                for bucket in self.buckets.iter_mut() {
                    bucket.close().await;
                }
                self.opened = false;
                self.set_status("Failed to open bucket");
                return Err(e.context(format!("Failed to open bucket #{}", index)));
            }
        }
        self.opened = true;
        Ok(())
    }

    async fn close(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.close().await;
        }
        self.opened = false;
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    async fn handle_messages(&mut self, messages: MessageBatch) -> HandleResult {
        if self.num_buckets == 0 {
            error!(
                "[{}] Failed to write - no buckets configured",
                self.core.category()
            );
            self.set_status("Failed write to bucket store");
            return Err(Unhandled::new("no buckets configured", messages));
        }

        let batches = self.bucketizer.partition(messages, self.num_buckets);
        let mut failed = MessageBatch::new();
        let mut failed_buckets = 0;

        for (index, batch) in batches.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            let result = dispatch(self.buckets[index].as_mut(), &self.bucketizer, batch).await;
            if let Err(unhandled) = result {
                warn!(
                    "[{}] Bucket #{} failed: {}",
                    self.core.category(),
                    index,
                    unhandled
                );
                failed_buckets += 1;
                failed.extend(unhandled.into_messages());
            }
        }

        if failed_buckets == 0 {
            // Children reconnect lazily after a close
            self.opened = true;
            self.set_status("");
            return Ok(());
        }

        self.set_status(&format!("Failed write to {} buckets", failed_buckets));
        Err(Unhandled::new(
            format!("{} buckets failed", failed_buckets),
            failed,
        ))
    }

    async fn periodic_check(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.periodic_check().await;
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let mut result = Ok(());
        for bucket in self.buckets.iter_mut() {
            if let Err(e) = bucket.flush().await {
                warn!("[{}] Failed to flush bucket: {:#}", self.core.category(), e);
                result = Err(e);
            }
        }
        result
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(self.copy_for(category))
    }

    fn status(&self) -> String {
        first_status(self.core.status(), self.buckets.iter().map(|b| b.as_ref()))
    }
}

/// Own status if set, otherwise the first child reporting a problem
pub(crate) fn first_status<'a>(
    own: &str,
    children: impl Iterator<Item = &'a dyn Store>,
) -> String {
    if !own.is_empty() {
        return own.to_string();
    }
    children
        .map(|child| child.status())
        .find(|status| !status.is_empty())
        .unwrap_or_default()
}

/// Send one sub-batch to a bucket
///
/// On failure the error carries the original entries the bucket did not
/// accept, so keys stripped for forwarding are available again for rehashing.
pub(crate) async fn dispatch(
    bucket: &mut dyn Store,
    bucketizer: &Bucketizer,
    batch: MessageBatch,
) -> HandleResult {
    let forwarded = bucketizer.prepare(&batch);
    let sent = if bucketizer.remove_key() {
        Some(forwarded.clone())
    } else {
        None
    };

    debug!(
        "Dispatching {} messages to {} bucket",
        forwarded.len(),
        bucket.store_type()
    );

    match bucket.handle_messages(forwarded).await {
        Ok(()) => Ok(()),
        Err(unhandled) => {
            let messages = match sent {
                Some(sent) => restore_originals(&batch, &sent, unhandled.messages),
                None => unhandled.messages,
            };
            Err(Unhandled::new(unhandled.reason, messages))
        }
    }
}

/// Map entries a bucket handed back onto the entries they were made from
fn restore_originals(
    originals: &[LogEntryPtr],
    sent: &[LogEntryPtr],
    returned: MessageBatch,
) -> MessageBatch {
    let positions: HashMap<*const LogEntry, usize> = sent
        .iter()
        .enumerate()
        .map(|(index, entry)| (Arc::as_ptr(entry), index))
        .collect();

    returned
        .into_iter()
        .map(|entry| match positions.get(&Arc::as_ptr(&entry)) {
            Some(&index) => originals[index].clone(),
            None => entry,
        })
        .collect()
}

/// Build the `num_buckets + 1` children of a bucket store
///
/// Children come either from a single `bucket` template or from explicit
/// `bucket0` .. `bucketN` sections. A `file` template gets its own
/// subdirectory per bucket.
pub(crate) fn create_buckets(
    conf: &StoreConf,
    category: &str,
    multi_category: bool,
) -> Result<Vec<Box<dyn Store>>> {
    let num_buckets = match conf.get_int("num_buckets") {
        Some(n) if n >= 1 => n as usize,
        Some(n) => bail!("num_buckets must be >= 1, got {}", n),
        None => bail!("num_buckets not set"),
    };

    let template = conf.get_store("bucket");
    let explicit = conf.contains("bucket0");

    let mut buckets = Vec::with_capacity(num_buckets + 1);
    match (template, explicit) {
        (Some(_), true) => bail!("both 'bucket' and 'bucket0' sections are set"),
        (Some(template), false) => {
            let subdir = conf
                .get_string("bucket_subdir")
                .unwrap_or_else(|| DEFAULT_BUCKET_SUBDIR.to_string());

            for index in 0..=num_buckets {
                let mut bucket_conf = template.clone();
                if template.store_type().as_deref() == Some("file") {
                    let base = template
                        .inherit(Some(conf))
                        .get_string("file_path")
                        .context("file bucket template has no file_path")?;
                    let path = Path::new(&base).join(format!("{}{:03}", subdir, index));
                    bucket_conf.set("file_path", path.to_string_lossy().to_string());
                }
                buckets.push(StoreFactory::create(
                    &bucket_conf,
                    category,
                    multi_category,
                    Some(conf),
                )?);
            }
        }
        (None, true) => {
            for index in 0..=num_buckets {
                let name = format!("bucket{}", index);
                let bucket_conf = conf
                    .get_store(&name)
                    .with_context(|| format!("section '{}' missing", name))?;
                buckets.push(StoreFactory::create(
                    &bucket_conf,
                    category,
                    multi_category,
                    Some(conf),
                )?);
            }
        }
        (None, false) => bail!("no 'bucket' or 'bucket0' section"),
    }

    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NullStore;

    #[test]
    fn test_restore_originals() {
        let originals: MessageBatch = vec![
            LogEntry::shared("c", "a:1"),
            LogEntry::shared("c", "b:2"),
        ];
        let sent: MessageBatch = vec![LogEntry::shared("c", "1"), LogEntry::shared("c", "2")];
        let returned = vec![sent[1].clone()];

        let restored = restore_originals(&originals, &sent, returned);
        assert_eq!(restored.len(), 1);
        assert!(Arc::ptr_eq(&restored[0], &originals[1]));
    }

    #[test]
    fn test_create_buckets_from_template() {
        let conf = StoreConf::from_yaml(
            "num_buckets: 3\nbucket:\n  type: null\n",
        )
        .unwrap();
        let buckets = create_buckets(&conf, "test", false).unwrap();
        assert_eq!(buckets.len(), 4);
        assert!(buckets.iter().all(|b| b.store_type() == "null"));
    }

    #[test]
    fn test_create_buckets_explicit_sections() {
        let conf = StoreConf::from_yaml(
            "num_buckets: 1\nbucket0:\n  type: null\nbucket1:\n  type: null\n",
        )
        .unwrap();
        assert_eq!(create_buckets(&conf, "test", false).unwrap().len(), 2);
    }

    #[test]
    fn test_create_buckets_missing_explicit_section() {
        let conf = StoreConf::from_yaml("num_buckets: 2\nbucket0:\n  type: null\n").unwrap();
        let err = create_buckets(&conf, "test", false).err().unwrap();
        assert!(err.to_string().contains("bucket1"));
    }

    #[test]
    fn test_create_buckets_requires_num_buckets() {
        let conf = StoreConf::from_yaml("bucket:\n  type: null\n").unwrap();
        assert!(create_buckets(&conf, "test", false).is_err());

        let conf = StoreConf::from_yaml("num_buckets: 0\nbucket:\n  type: null\n").unwrap();
        assert!(create_buckets(&conf, "test", false).is_err());
    }

    #[test]
    fn test_file_template_gets_subdirectories() {
        let conf = StoreConf::from_yaml(
            "num_buckets: 2\nbucket_subdir: shard\nbucket:\n  type: file\n  file_path: /tmp/relay\n",
        )
        .unwrap();
        let buckets = create_buckets(&conf, "test", false).unwrap();
        assert_eq!(buckets.len(), 3);
    }

    #[test]
    fn test_bad_config_leaves_store_unusable() {
        let conf = StoreConf::from_yaml("type: bucket\nbucket:\n  type: null\n").unwrap();
        let mut store = BucketStore::new("test", false);
        store.configure(&conf, None);

        assert_eq!(store.num_buckets(), 0);
        assert_eq!(store.status(), "Bad config for bucket store");
    }

    #[test]
    fn test_copy_is_independent() {
        let buckets: Vec<Box<dyn Store>> = (0..3)
            .map(|_| Box::new(NullStore::new("orig", false)) as Box<dyn Store>)
            .collect();
        let store = BucketStore::with_buckets("orig", Bucketizer::new(BucketType::KeyHash), buckets);

        let copy = store.copy_for("other");
        assert_eq!(copy.category(), "other");
        assert_eq!(copy.store_type(), "bucket");
        assert_eq!(copy.num_buckets(), 2);
        for index in 0..3 {
            assert_eq!(copy.bucket(index).unwrap().category(), "other");
            assert_eq!(store.bucket(index).unwrap().category(), "orig");
        }

        let boxed = store.copy("third");
        assert_eq!(boxed.category(), "third");
    }
}
