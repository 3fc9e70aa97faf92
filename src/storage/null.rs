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

// Null store: accepts and discards everything

use super::backend::{HandleResult, Store, StoreCore};
use crate::config::StoreConf;
use crate::message::MessageBatch;
use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;

pub struct NullStore {
    core: StoreCore,
    opened: bool,
    handled: u64,
}

impl NullStore {
    pub fn new(category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(category, "null", multi_category),
            opened: false,
            handled: 0,
        }
    }

    /// Messages discarded since creation
    pub fn handled(&self) -> u64 {
        self.handled
    }
}

#[async_trait]
impl Store for NullStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StoreCore {
        &mut self.core
    }

    fn configure(&mut self, _conf: &StoreConf, _parent: Option<&StoreConf>) {}

    async fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.opened = false;
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    async fn handle_messages(&mut self, messages: MessageBatch) -> HandleResult {
        self.opened = true;
        self.handled += messages.len() as u64;
        trace!("[{}] Discarded {} messages", self.core.category(), messages.len());
        Ok(())
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(NullStore::new(category, self.core.multi_category()))
    }
}
