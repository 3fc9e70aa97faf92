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

// Per-category store queue
//
// Each queue owns one store tree and a worker task. The worker is the only
// caller of the store's message path, and maintenance ticks take the same
// lock, so handle_messages and periodic_check never overlap on one tree.

use crate::config::RelaySettings;
use crate::message::{batch_bytes, MessageBatch};
use crate::storage::Store;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// A store tree shared between its queue worker and status readers
pub type SharedStore = Arc<Mutex<Box<dyn Store>>>;

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub check_interval: Duration,
    pub retry_interval: Duration,
    /// Bytes that may be queued before `has_room` turns false
    pub max_queue_size: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        (&RelaySettings::default()).into()
    }
}

impl From<&RelaySettings> for QueueOptions {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            check_interval: settings.check_interval(),
            retry_interval: settings.retry_interval(),
            max_queue_size: settings.max_queue_size,
        }
    }
}

/// Queue counters
#[derive(Debug, Default)]
pub struct QueueStats {
    received: AtomicU64,
    sent: AtomicU64,
    requeued: AtomicU64,
    queued_bytes: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub requeued: u64,
    pub queued_bytes: usize,
}

impl QueueStats {
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            queued_bytes: self.queued_bytes.load(Ordering::Relaxed),
        }
    }
}

enum QueueCommand {
    Messages(MessageBatch),
    Stop(oneshot::Sender<MessageBatch>),
}

pub struct StoreQueue {
    category: String,
    store: SharedStore,
    options: QueueOptions,
    stats: Arc<QueueStats>,
    sender: mpsc::UnboundedSender<QueueCommand>,
}

impl StoreQueue {
    /// Spawn the worker for `store` on the current runtime
    pub fn start(category: &str, store: Box<dyn Store>, options: QueueOptions) -> Self {
        let store: SharedStore = Arc::new(Mutex::new(store));
        let stats = Arc::new(QueueStats::default());
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = Worker {
            category: category.to_string(),
            store: store.clone(),
            options: options.clone(),
            stats: stats.clone(),
            pending: MessageBatch::new(),
            retry_at: None,
        };
        tokio::spawn(worker.run(receiver));

        info!(
            "[{}] Store queue started (check every {:?}, retry after {:?})",
            category, options.check_interval, options.retry_interval
        );

        Self {
            category: category.to_string(),
            store,
            options,
            stats,
            sender,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// False once `max_queue_size` bytes are waiting
    pub fn has_room(&self) -> bool {
        self.stats.queued_bytes.load(Ordering::Relaxed) < self.options.max_queue_size
    }

    /// Hand a batch to the worker
    pub fn add_messages(&self, messages: MessageBatch) {
        if messages.is_empty() {
            return;
        }
        let count = messages.len();
        let bytes = batch_bytes(&messages);
        self.stats.received.fetch_add(count as u64, Ordering::Relaxed);
        self.stats.queued_bytes.fetch_add(bytes, Ordering::Relaxed);

        if self.sender.send(QueueCommand::Messages(messages)).is_err() {
            error!(
                "[{}] Queue stopped, lost {} messages",
                self.category, count
            );
        }
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn status(&self) -> String {
        self.store.lock().await.status()
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Stop the worker after a final send attempt
    ///
    /// Returns whatever the store still refused. Calling it again returns an
    /// empty batch.
    pub async fn stop(&self) -> MessageBatch {
        let (reply, unsent) = oneshot::channel();
        if self.sender.send(QueueCommand::Stop(reply)).is_err() {
            return MessageBatch::new();
        }
        unsent.await.unwrap_or_default()
    }
}

struct Worker {
    category: String,
    store: SharedStore,
    options: QueueOptions,
    stats: Arc<QueueStats>,
    pending: MessageBatch,
    retry_at: Option<Instant>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<QueueCommand>) {
        {
            let mut store = self.store.lock().await;
            if let Err(e) = store.open().await {
                warn!("[{}] Initial open failed: {:#}", self.category, e);
            }
        }

        let period = self.options.check_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_deadline = self.retry_at;
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(QueueCommand::Messages(batch)) => {
                        self.pending.extend(batch);
                        self.try_send().await;
                    }
                    Some(QueueCommand::Stop(reply)) => {
                        let unsent = self.shutdown(&mut receiver).await;
                        let _ = reply.send(unsent);
                        return;
                    }
                    None => {
                        let unsent = self.shutdown(&mut receiver).await;
                        if !unsent.is_empty() {
                            error!("[{}] Dropped {} unsent messages", self.category, unsent.len());
                        }
                        return;
                    }
                },
                _ = ticker.tick() => {
                    self.store.lock().await.periodic_check().await;
                    self.retry_at = None;
                    self.try_send().await;
                }
                _ = tokio::time::sleep_until(retry_deadline.unwrap_or_else(Instant::now)), if retry_deadline.is_some() => {
                    self.retry_at = None;
                    self.try_send().await;
                }
            }
        }
    }

    async fn try_send(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return;
            }
        }

        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        let bytes = batch_bytes(&batch);
        let result = {
            let mut store = self.store.lock().await;
            store.handle_messages(batch).await
        };

        match result {
            Ok(()) => {
                self.stats.sent.fetch_add(count as u64, Ordering::Relaxed);
                self.stats.queued_bytes.fetch_sub(bytes, Ordering::Relaxed);
                self.retry_at = None;
                debug!("[{}] Sent {} messages", self.category, count);
            }
            Err(unhandled) => {
                let returned = unhandled.messages.len();
                let returned_bytes = batch_bytes(&unhandled.messages);
                self.stats
                    .sent
                    .fetch_add(count.saturating_sub(returned) as u64, Ordering::Relaxed);
                self.stats
                    .queued_bytes
                    .fetch_sub(bytes.saturating_sub(returned_bytes), Ordering::Relaxed);
                self.stats
                    .requeued
                    .fetch_add(returned as u64, Ordering::Relaxed);

                warn!(
                    "[{}] {}, retrying in {:?}",
                    self.category, unhandled, self.options.retry_interval
                );
                self.pending = unhandled.into_messages();
                let delay = self.options.retry_interval.max(MIN_RETRY_DELAY);
                self.retry_at = Some(Instant::now() + delay);
            }
        }
    }

    async fn shutdown(&mut self, receiver: &mut mpsc::UnboundedReceiver<QueueCommand>) -> MessageBatch {
        receiver.close();
        while let Ok(command) = receiver.try_recv() {
            match command {
                QueueCommand::Messages(batch) => self.pending.extend(batch),
                QueueCommand::Stop(reply) => {
                    let _ = reply.send(MessageBatch::new());
                }
            }
        }

        self.retry_at = None;
        self.try_send().await;

        let mut store = self.store.lock().await;
        if let Err(e) = store.flush().await {
            warn!("[{}] Flush on shutdown failed: {:#}", self.category, e);
        }
        store.close().await;

        let unsent = std::mem::take(&mut self.pending);
        info!(
            "[{}] Store queue stopped ({} messages unsent)",
            self.category,
            unsent.len()
        );
        unsent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConf;
    use crate::message::LogEntry;
    use crate::storage::{FileStore, NullStore};

    fn fast_options(max_queue_size: usize) -> QueueOptions {
        QueueOptions {
            check_interval: Duration::from_millis(50),
            retry_interval: Duration::from_millis(10),
            max_queue_size,
        }
    }

    fn batch(count: usize) -> MessageBatch {
        (0..count)
            .map(|i| LogEntry::shared("test", format!("message {}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_messages_reach_store() {
        let queue = StoreQueue::start("test", Box::new(NullStore::new("test", false)), fast_options(1_000));

        queue.add_messages(batch(5));
        let unsent = queue.stop().await;

        assert!(unsent.is_empty());
        let stats = queue.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.sent, 5);
        assert_eq!(stats.queued_bytes, 0);
    }

    #[tokio::test]
    async fn test_failing_store_keeps_messages() {
        // No file_path: every open fails
        let mut store = FileStore::new("test", false);
        store.configure(&StoreConf::new(), None);
        let queue = StoreQueue::start("test", Box::new(store), fast_options(20));

        let messages = batch(3);
        queue.add_messages(messages.clone());
        assert!(!queue.has_room());

        let unsent = queue.stop().await;
        assert_eq!(unsent, messages);
        assert_eq!(queue.stats().sent, 0);
        assert!(queue.stats().requeued >= 3);
    }

    #[tokio::test]
    async fn test_zero_retry_interval_is_bounded() {
        let mut store = FileStore::new("test", false);
        store.configure(&StoreConf::new(), None);
        let options = QueueOptions {
            check_interval: Duration::from_secs(60),
            retry_interval: Duration::ZERO,
            max_queue_size: 1_000,
        };
        let queue = StoreQueue::start("test", Box::new(store), options);

        queue.add_messages(batch(1));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Attempts are spaced out even with no configured delay
        assert!(queue.stats().requeued <= 200);
        assert_eq!(queue.stop().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_twice() {
        let queue = StoreQueue::start("test", Box::new(NullStore::new("test", false)), fast_options(1_000));
        assert!(queue.stop().await.is_empty());
        assert!(queue.stop().await.is_empty());
    }
}
