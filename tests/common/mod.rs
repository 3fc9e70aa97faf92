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

// Shared test helpers: a scriptable in-memory store

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use log_relay::{HandleResult, LogEntry, LogEntryPtr, MessageBatch, Store, StoreConf, StoreCore, Unhandled};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// What a `FakeStore` has seen, and how it should misbehave
#[derive(Debug, Default)]
pub struct FakeState {
    pub accepted: Vec<LogEntryPtr>,
    /// Backend unreachable: open and handle_messages fail
    pub down: bool,
    /// Fail this many upcoming open calls
    pub open_failures: usize,
    /// Reject entries of this category but accept the rest
    pub reject_category: Option<String>,
    pub open_calls: usize,
    pub handle_calls: usize,
    pub close_calls: usize,
}

pub type FakeHandle = Arc<Mutex<FakeState>>;

pub struct FakeStore {
    core: StoreCore,
    state: FakeHandle,
    opened: bool,
}

impl FakeStore {
    pub fn new(category: &str) -> (Self, FakeHandle) {
        let state = FakeHandle::default();
        let store = Self {
            core: StoreCore::new(category, "fake", false),
            state: state.clone(),
            opened: false,
        };
        (store, state)
    }
}

#[async_trait]
impl Store for FakeStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StoreCore {
        &mut self.core
    }

    fn configure(&mut self, _conf: &StoreConf, _parent: Option<&StoreConf>) {}

    async fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open_calls += 1;
        if state.down {
            bail!("backend down");
        }
        if state.open_failures > 0 {
            state.open_failures -= 1;
            bail!("open failed");
        }
        self.opened = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().close_calls += 1;
        self.opened = false;
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    async fn handle_messages(&mut self, messages: MessageBatch) -> HandleResult {
        if !self.opened {
            if let Err(e) = self.open().await {
                return Err(Unhandled::new(e.to_string(), messages));
            }
        }

        let mut state = self.state.lock().unwrap();
        state.handle_calls += 1;
        if state.down {
            drop(state);
            self.opened = false;
            return Err(Unhandled::new("backend down", messages));
        }

        let (rejected, accepted): (MessageBatch, MessageBatch) = messages
            .into_iter()
            .partition(|m| state.reject_category.as_deref() == Some(m.category.as_str()));
        state.accepted.extend(accepted);

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(Unhandled::new("category rejected", rejected))
        }
    }

    /// Copies start with fresh, healthy state
    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(FakeStore::new(category).0)
    }
}

/// Default bucket plus `num_buckets` hash buckets
pub fn fake_buckets(num_buckets: usize) -> (Vec<Box<dyn Store>>, Vec<FakeHandle>) {
    (0..=num_buckets)
        .map(|_| {
            let (store, state) = FakeStore::new("test");
            (Box::new(store) as Box<dyn Store>, state)
        })
        .unzip()
}

pub fn messages(category: &str, count: usize) -> MessageBatch {
    (0..count)
        .map(|i| LogEntry::shared(category, format!("message {}", i)))
        .collect()
}

pub fn accepted_count(state: &FakeHandle) -> usize {
    state.lock().unwrap().accepted.len()
}

pub fn handle_calls(state: &FakeHandle) -> usize {
    state.lock().unwrap().handle_calls
}

pub fn set_down(state: &FakeHandle, down: bool) {
    state.lock().unwrap().down = down;
}

/// Entry identities, for comparing batches regardless of order
pub fn identities(batch: &[LogEntryPtr]) -> HashSet<*const LogEntry> {
    batch.iter().map(Arc::as_ptr).collect()
}

/// Everything every fake accepted, in bucket order
pub fn all_accepted(states: &[FakeHandle]) -> Vec<LogEntryPtr> {
    states
        .iter()
        .flat_map(|s| s.lock().unwrap().accepted.clone())
        .collect()
}
