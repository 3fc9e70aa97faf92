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

// Log entries and message batches passed between the relay and its stores

use bytes::Bytes;
use std::sync::Arc;

/// A single log line for a category. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub category: String,
    pub message: Bytes,
}

impl LogEntry {
    pub fn new(category: impl Into<String>, message: impl Into<Bytes>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor returning the shared form used in batches
    pub fn shared(category: impl Into<String>, message: impl Into<Bytes>) -> LogEntryPtr {
        Arc::new(Self::new(category, message))
    }

    pub fn len(&self) -> usize {
        self.message.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

/// Entries are shared so that a retry can re-home them into another batch
/// without copying the payload.
pub type LogEntryPtr = Arc<LogEntry>;

/// A batch is owned by exactly one in-flight call at a time.
pub type MessageBatch = Vec<LogEntryPtr>;

/// Total payload bytes in a batch
pub fn batch_bytes(batch: &[LogEntryPtr]) -> usize {
    batch.iter().map(|entry| entry.len()).sum()
}
