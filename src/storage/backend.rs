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

// Store trait shared by every destination

use crate::config::StoreConf;
use crate::message::MessageBatch;
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Messages a store could not persist, handed back to the caller
///
/// Store failures never cross the store boundary as anything else: the
/// caller gets back exactly the entries it must resubmit.
#[derive(Debug, Error)]
#[error("{reason} ({} messages unhandled)", .messages.len())]
pub struct Unhandled {
    pub reason: String,
    pub messages: MessageBatch,
}

impl Unhandled {
    pub fn new(reason: impl Into<String>, messages: MessageBatch) -> Self {
        Self {
            reason: reason.into(),
            messages,
        }
    }

    pub fn into_messages(self) -> MessageBatch {
        self.messages
    }
}

pub type HandleResult = std::result::Result<(), Unhandled>;

/// Identity and status every store carries
#[derive(Debug, Clone)]
pub struct StoreCore {
    category: String,
    store_type: &'static str,
    multi_category: bool,
    status: String,
}

impl StoreCore {
    pub fn new(category: &str, store_type: &'static str, multi_category: bool) -> Self {
        Self {
            category: category.to_string(),
            store_type,
            multi_category,
            status: String::new(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn store_type(&self) -> &'static str {
        self.store_type
    }

    pub fn multi_category(&self) -> bool {
        self.multi_category
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: &str) {
        if self.status != status {
            debug!(
                "[{}] {} store status: '{}'",
                self.category, self.store_type, status
            );
            self.status = status.to_string();
        }
    }
}

/// Destination for log messages
///
/// A store tree is driven by a single owner (see `StoreQueue`), so every
/// mutating operation takes `&mut self`. Failures are reported through
/// `HandleResult` and the status string, never by panicking.
#[async_trait]
pub trait Store: Send + Sync {
    fn core(&self) -> &StoreCore;

    fn core_mut(&mut self) -> &mut StoreCore;

    /// Read store options. Missing or malformed optional keys are logged and
    /// replaced by defaults; keys missing locally are looked up in `parent`.
    fn configure(&mut self, conf: &StoreConf, parent: Option<&StoreConf>);

    /// Establish the underlying resource. Idempotent when already open.
    async fn open(&mut self) -> Result<()>;

    /// Release the underlying resource. Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Persist every entry of `messages`
    ///
    /// Opens the store lazily. On failure the error carries only the entries
    /// that were not persisted.
    async fn handle_messages(&mut self, messages: MessageBatch) -> HandleResult;

    /// Health maintenance, called on a fixed schedule
    async fn periodic_check(&mut self) {}

    /// Push buffered data to durable storage
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Independent store configured identically for another category
    fn copy(&self, category: &str) -> Box<dyn Store>;

    /// Last known health summary. Empty means healthy.
    fn status(&self) -> String {
        self.core().status().to_string()
    }

    fn set_status(&mut self, status: &str) {
        self.core_mut().set_status(status);
    }

    fn category(&self) -> &str {
        self.core().category()
    }

    fn store_type(&self) -> &str {
        self.core().store_type()
    }

    fn is_multi_category(&self) -> bool {
        self.core().multi_category()
    }
}
