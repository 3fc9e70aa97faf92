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

// Store module
//
// Every destination implements the `Store` trait. Bucket stores are
// themselves stores whose children are built by `StoreFactory`, so store
// trees of any depth come out of one configuration section.

pub mod backend;
pub mod bucket;
pub mod bucketize;
pub mod factory;
pub mod fallback;
pub mod filesystem;
pub mod network;
pub mod null;

pub use backend::{HandleResult, Store, StoreCore, Unhandled};
pub use bucket::BucketStore;
pub use bucketize::{djb2, BucketType, Bucketizer, KeyHasher, DEFAULT_DELIMITER};
pub use factory::StoreFactory;
pub use fallback::BucketFallbackStore;
pub use filesystem::FileStore;
pub use network::NetworkStore;
pub use null::NullStore;
