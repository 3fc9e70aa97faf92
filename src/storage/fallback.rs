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

// Bucket fallback store
//
// Same routing as the bucket store, but a bucket that fails is quarantined
// and its messages are rehashed over the buckets still alive. This repeats
// until every message is placed or no hash bucket is left. Quarantined
// buckets are reopened by periodic_check and rejoin routing when that works.

use super::backend::{HandleResult, Store, StoreCore, Unhandled};
use super::bucket::{create_buckets, dispatch, first_status};
use super::bucketize::{BucketType, Bucketizer};
use crate::config::StoreConf;
use crate::message::MessageBatch;
use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

const NO_BUCKETS_AVAILABLE: &str = "No Buckets Available";

/// A child store plus its configured index, which stays with it while it
/// moves between the live and dead lists
struct Bucket {
    id: usize,
    store: Box<dyn Store>,
}

pub struct BucketFallbackStore {
    core: StoreCore,
    bucketizer: Bucketizer,
    live: Vec<Bucket>,
    dead: Vec<Bucket>,
    opened: bool,
}

impl BucketFallbackStore {
    pub fn new(category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(category, "bucket_fallback", multi_category),
            bucketizer: Bucketizer::new(BucketType::Random),
            live: Vec::new(),
            dead: Vec::new(),
            opened: false,
        }
    }

    /// Store over already built children; `buckets[0]` is the default bucket
    pub fn with_buckets(category: &str, bucketizer: Bucketizer, buckets: Vec<Box<dyn Store>>) -> Self {
        let mut store = Self::new(category, false);
        store.bucketizer = bucketizer;
        store.live = into_buckets(buckets);
        store
    }

    /// Hash buckets currently taking traffic (the default bucket is not
    /// counted)
    pub fn num_buckets(&self) -> usize {
        self.live.len().saturating_sub(1)
    }

    pub fn live_bucket_count(&self) -> usize {
        self.live.len()
    }

    pub fn dead_bucket_count(&self) -> usize {
        self.dead.len()
    }

    /// Configured indexes of the live buckets, in routing order
    pub fn live_bucket_ids(&self) -> Vec<usize> {
        self.live.iter().map(|b| b.id).collect()
    }

    pub fn dead_bucket_ids(&self) -> Vec<usize> {
        self.dead.iter().map(|b| b.id).collect()
    }

    pub fn bucketizer(&self) -> &Bucketizer {
        &self.bucketizer
    }

    /// Same configuration for another category. Every bucket, dead ones
    /// included, starts live in the copy.
    pub fn copy_for(&self, category: &str) -> Self {
        let mut all: Vec<&Bucket> = self.live.iter().chain(self.dead.iter()).collect();
        all.sort_by_key(|b| b.id);

        Self {
            core: StoreCore::new(category, "bucket_fallback", self.core.multi_category()),
            bucketizer: self.bucketizer.clone(),
            live: all
                .into_iter()
                .map(|b| Bucket {
                    id: b.id,
                    store: b.store.copy(category),
                })
                .collect(),
            dead: Vec::new(),
            opened: false,
        }
    }

    fn quarantine(&mut self, position: usize, reason: &str) {
        let bucket = self.live.remove(position);
        warn!(
            "[{}] Bucket #{} of type {} down: {}",
            self.core.category(),
            bucket.id,
            bucket.store.store_type(),
            reason
        );
        self.dead.push(bucket);
        self.set_status(&format!("Buckets not available: {}", self.dead.len()));
    }
}

fn into_buckets(stores: Vec<Box<dyn Store>>) -> Vec<Bucket> {
    stores
        .into_iter()
        .enumerate()
        .map(|(id, store)| Bucket { id, store })
        .collect()
}

#[async_trait]
impl Store for BucketFallbackStore {
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
        self.dead.clear();

        match create_buckets(&conf, &category, self.core.multi_category()) {
            Ok(buckets) => {
                self.live = into_buckets(buckets);
                info!(
                    "[{}] Bucket fallback store configured with {} buckets ({})",
                    category,
                    self.num_buckets(),
                    self.bucketizer.bucket_type()
                );
            }
            Err(e) => {
                error!("[{}] Bad config - {:#}", category, e);
                self.live.clear();
                self.set_status("Bad config for bucket fallback store");
            }
        }
    }

    /// Opens every live bucket. Buckets that fail are quarantined; the store
    /// is usable while at least one hash bucket opened.
    async fn open(&mut self) -> Result<()> {
        let mut position = 0;
        while position < self.live.len() {
            match self.live[position].store.open().await {
                Ok(()) => position += 1,
                Err(e) => self.quarantine(position, &format!("{:#}", e)),
            }
        }

        if self.num_buckets() == 0 {
            self.opened = false;
            self.set_status(NO_BUCKETS_AVAILABLE);
            bail!("[{}] no buckets available", self.core.category());
        }

        self.opened = true;
        Ok(())
    }

    async fn close(&mut self) {
        for bucket in self.live.iter_mut().chain(self.dead.iter_mut()) {
            bucket.store.close().await;
        }
        self.opened = false;
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    async fn handle_messages(&mut self, messages: MessageBatch) -> HandleResult {
        if self.num_buckets() == 0 {
            error!(
                "[{}] Failed to write - no buckets configured",
                self.core.category()
            );
            self.set_status("Failed write to bucket store");
            return Err(Unhandled::new("no buckets configured", messages));
        }

        // Every pass that leaves messages behind has quarantined at least one
        // bucket, so this runs at most once per bucket.
        let mut pending = messages;
        loop {
            let num_buckets = self.num_buckets();
            let ids: Vec<usize> = self.live.iter().map(|b| b.id).collect();
            let batches = self.bucketizer.partition(pending, num_buckets);
            let mut failed = MessageBatch::new();

            for (index, batch) in batches.into_iter().enumerate() {
                if batch.is_empty() {
                    continue;
                }
                // Resolve by id: earlier failures in this pass shift positions
                let Some(position) = self.live.iter().position(|b| b.id == ids[index]) else {
                    failed.extend(batch);
                    continue;
                };

                let bucket = self.live[position].store.as_mut();
                let result = dispatch(bucket, &self.bucketizer, batch).await;
                if let Err(unhandled) = result {
                    let reason = unhandled.reason.clone();
                    failed.extend(unhandled.into_messages());
                    self.quarantine(position, &reason);
                }
            }

            if failed.is_empty() {
                self.opened = true;
                return Ok(());
            }

            if self.num_buckets() == 0 {
                error!(
                    "[{}] All buckets down, returning {} messages",
                    self.core.category(),
                    failed.len()
                );
                self.set_status(NO_BUCKETS_AVAILABLE);
                return Err(Unhandled::new("no buckets available", failed));
            }

            debug!(
                "[{}] Retrying {} messages on {} remaining buckets",
                self.core.category(),
                failed.len(),
                self.num_buckets()
            );
            pending = failed;
        }
    }

    async fn periodic_check(&mut self) {
        for bucket in self.live.iter_mut() {
            bucket.store.periodic_check().await;
        }

        if !self.dead.is_empty() {
            info!(
                "[{}] {} dead buckets, trying to reopen",
                self.core.category(),
                self.dead.len()
            );

            let mut reopen_failed = false;
            let mut still_dead = Vec::new();
            for mut bucket in std::mem::take(&mut self.dead) {
                match bucket.store.open().await {
                    Ok(()) => {
                        info!("[{}] Bucket #{} alive", self.core.category(), bucket.id);
                        self.live.push(bucket);
                    }
                    Err(e) => {
                        debug!(
                            "[{}] Bucket #{} still down: {:#}",
                            self.core.category(),
                            bucket.id,
                            e
                        );
                        reopen_failed = true;
                        still_dead.push(bucket);
                    }
                }
            }
            self.dead = still_dead;

            // A bucket that cannot be reopened resets the whole store; live
            // buckets reconnect on the next handle_messages.
            if reopen_failed {
                warn!(
                    "[{}] {} buckets could not be reopened, closing store",
                    self.core.category(),
                    self.dead.len()
                );
                self.close().await;
            }
        }

        if self.dead.is_empty() {
            self.set_status("");
        } else if self.num_buckets() > 0 {
            self.set_status(&format!("Buckets not available: {}", self.dead.len()));
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let mut result = Ok(());
        for bucket in self.live.iter_mut() {
            if let Err(e) = bucket.store.flush().await {
                warn!(
                    "[{}] Failed to flush bucket #{}: {:#}",
                    self.core.category(),
                    bucket.id,
                    e
                );
                result = Err(e);
            }
        }
        result
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(self.copy_for(category))
    }

    fn status(&self) -> String {
        first_status(
            self.core.status(),
            self.live.iter().map(|b| b.store.as_ref()),
        )
    }
}
