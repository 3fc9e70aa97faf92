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

// Relay: routes incoming entries to per-category store queues

use crate::config::{CategoryConfig, RelayConfig};
use crate::message::{LogEntry, MessageBatch};
use crate::queue::{QueueOptions, QueueStatsSnapshot, StoreQueue};
use crate::storage::{Store, StoreFactory};
use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogResult {
    Ok,
    /// A target queue is full; nothing from the call was enqueued
    TryLater,
}

/// Store configuration used for categories not listed by name
struct Model {
    name: String,
    /// `None` for the default model
    prefix: Option<String>,
    multi_category: bool,
    template: Box<dyn Store>,
}

impl Model {
    fn matches(&self, category: &str) -> bool {
        match &self.prefix {
            Some(prefix) => category.starts_with(prefix.as_str()),
            None => true,
        }
    }

    /// Category given to the store shared by a multi_category model
    fn shared_name(&self) -> &str {
        match self.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => "default",
        }
    }
}

pub struct Relay {
    options: QueueOptions,
    models: Vec<Model>,
    queues: DashMap<String, Arc<StoreQueue>>,
    /// Queues of multi_category models, keyed by model name
    shared: DashMap<String, Arc<StoreQueue>>,
    dropped: AtomicU64,
}

impl Relay {
    /// Build stores for every configured category and start their queues
    ///
    /// Must run inside a tokio runtime.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let options = QueueOptions::from(&config.relay);
        let queues = DashMap::new();
        let mut models = Vec::new();

        for category in &config.categories {
            let store = create_store(category)?;
            if category.is_model() {
                debug!("[{}] Registered category model", category.category);
                models.push(Model {
                    name: category.category.clone(),
                    prefix: category.prefix().map(str::to_string),
                    multi_category: category.multi_category,
                    template: store,
                });
            } else {
                let queue = StoreQueue::start(&category.category, store, options.clone());
                queues.insert(category.category.clone(), Arc::new(queue));
            }
        }

        // Prefix models are tried before the default one
        models.sort_by_key(|m| m.prefix.is_none());

        info!(
            "Relay started with {} categories and {} models",
            queues.len(),
            models.len()
        );

        Ok(Self {
            options,
            models,
            queues,
            shared: DashMap::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue entries by category
    ///
    /// All or nothing: if any target queue is full, nothing is enqueued.
    /// Entries for categories with no matching configuration are dropped.
    pub fn log(&self, entries: Vec<LogEntry>) -> LogResult {
        let mut grouped: HashMap<String, MessageBatch> = HashMap::new();
        for entry in entries {
            grouped
                .entry(entry.category.clone())
                .or_default()
                .push(Arc::new(entry));
        }

        let mut routed = Vec::with_capacity(grouped.len());
        for (category, batch) in grouped {
            match self.resolve(&category) {
                Some(queue) => routed.push((queue, batch)),
                None => {
                    warn!(
                        "[{}] No store configured, dropping {} messages",
                        category,
                        batch.len()
                    );
                    self.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                }
            }
        }

        if routed.iter().any(|(queue, _)| !queue.has_room()) {
            debug!("Queue full, asking caller to try later");
            return LogResult::TryLater;
        }

        for (queue, batch) in routed {
            queue.add_messages(batch);
        }
        LogResult::Ok
    }

    /// Queue for `category`, created from a matching model on first use
    fn resolve(&self, category: &str) -> Option<Arc<StoreQueue>> {
        if let Some(queue) = self.queues.get(category) {
            return Some(queue.clone());
        }

        let model = self.models.iter().find(|m| m.matches(category))?;
        let queue = if model.multi_category {
            match self.shared.entry(model.name.clone()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let name = model.shared_name();
                    let store = model.template.copy(name);
                    let queue = Arc::new(StoreQueue::start(name, store, self.options.clone()));
                    entry.insert(queue.clone());
                    queue
                }
            }
        } else {
            info!("[{}] Creating store from model '{}'", category, model.name);
            let store = model.template.copy(category);
            Arc::new(StoreQueue::start(category, store, self.options.clone()))
        };

        Some(
            self.queues
                .entry(category.to_string())
                .or_insert(queue)
                .clone(),
        )
    }

    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats(&self, category: &str) -> Option<QueueStatsSnapshot> {
        self.queues.get(category).map(|queue| queue.stats())
    }

    /// Entries dropped because no configuration matched their category
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Status of every active category, sorted by name
    pub async fn status(&self) -> Vec<(String, String)> {
        let queues: Vec<(String, Arc<StoreQueue>)> = self
            .queues
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut statuses = Vec::with_capacity(queues.len());
        for (category, queue) in queues {
            statuses.push((category, queue.status().await));
        }
        statuses.sort();
        statuses
    }

    /// Stop every queue; returns how many messages could not be delivered
    pub async fn shutdown(&self) -> usize {
        let mut unique: Vec<Arc<StoreQueue>> = Vec::new();
        for entry in self.queues.iter() {
            if !unique.iter().any(|q| Arc::ptr_eq(q, entry.value())) {
                unique.push(entry.value().clone());
            }
        }
        for entry in self.shared.iter() {
            if !unique.iter().any(|q| Arc::ptr_eq(q, entry.value())) {
                unique.push(entry.value().clone());
            }
        }

        let mut unsent = 0;
        for queue in unique {
            let remaining = queue.stop().await;
            if !remaining.is_empty() {
                warn!(
                    "[{}] {} messages not delivered at shutdown",
                    queue.category(),
                    remaining.len()
                );
            }
            unsent += remaining.len();
        }

        self.queues.clear();
        self.shared.clear();
        info!("Relay shut down ({} messages undelivered)", unsent);
        unsent
    }
}

fn create_store(category: &CategoryConfig) -> Result<Box<dyn Store>> {
    StoreFactory::create(
        &category.store,
        &category.category,
        category.multi_category,
        None,
    )
    .with_context(|| format!("Failed to create store for category '{}'", category.category))
}
