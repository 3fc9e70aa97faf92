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

// Log aggregation relay
//
// Accepts log entries tagged with a category and forwards them to
// configured stores:
// - Per-category store queues with retry and periodic maintenance
// - Bucket stores that shard a category by key hash, random or round robin
// - Bucket fallback stores that quarantine failing buckets and rehash their
//   traffic over the survivors until the dead ones come back
// - File, network (HTTP) and null destinations

pub mod config;
pub mod message;
pub mod queue;
pub mod relay;
pub mod storage;

// Re-export main types
pub use config::{load_config, load_config_with_env, RelayConfig, StoreConf};
pub use message::{LogEntry, LogEntryPtr, MessageBatch};
pub use queue::{QueueOptions, QueueStatsSnapshot, StoreQueue};
pub use relay::{LogResult, Relay};
pub use storage::{
    BucketFallbackStore, BucketStore, BucketType, Bucketizer, HandleResult, Store, StoreCore,
    StoreFactory, Unhandled,
};
