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

// Bucket selection for the bucket stores
//
// A bucket store with `n` hash buckets owns `n + 1` children. Index 0 is the
// default bucket for messages without an extractable key; every policy maps
// keyed messages into `1..=n`.

use crate::config::StoreConf;
use crate::message::{LogEntry, LogEntryPtr, MessageBatch};
use bytes::Bytes;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_DELIMITER: u8 = b':';

/// Hash used by the `key_hash` policy
pub type KeyHasher = fn(&[u8]) -> u32;

/// djb2 string hash over the key bytes (seed 5381, `h * 33 + byte`)
pub fn djb2(key: &[u8]) -> u32 {
    key.iter()
        .fold(5381u32, |hash, &b| hash.wrapping_mul(33).wrapping_add(u32::from(b)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketType {
    Random,
    KeyHash,
    RoundRobin,
}

impl BucketType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "random" => Some(BucketType::Random),
            "key_hash" => Some(BucketType::KeyHash),
            "round_robin" => Some(BucketType::RoundRobin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketType::Random => "random",
            BucketType::KeyHash => "key_hash",
            BucketType::RoundRobin => "round_robin",
        }
    }
}

impl fmt::Display for BucketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing policy plus the key options shared by both bucket stores
#[derive(Clone)]
pub struct Bucketizer {
    bucket_type: BucketType,
    delimiter: u8,
    /// Hash the whole message instead of the part before the delimiter
    whole_message_key: bool,
    remove_key: bool,
    hasher: KeyHasher,
    next: usize,
}

impl fmt::Debug for Bucketizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucketizer")
            .field("bucket_type", &self.bucket_type)
            .field("delimiter", &char::from(self.delimiter))
            .field("whole_message_key", &self.whole_message_key)
            .field("remove_key", &self.remove_key)
            .finish()
    }
}

impl Bucketizer {
    pub fn new(bucket_type: BucketType) -> Self {
        Self {
            bucket_type,
            delimiter: DEFAULT_DELIMITER,
            whole_message_key: false,
            remove_key: false,
            hasher: djb2,
            next: 0,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_whole_message_key(mut self, whole_message_key: bool) -> Self {
        self.whole_message_key = whole_message_key;
        self
    }

    pub fn with_remove_key(mut self, remove_key: bool) -> Self {
        self.remove_key = remove_key;
        self
    }

    pub fn with_hasher(mut self, hasher: KeyHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn bucket_type(&self) -> BucketType {
        self.bucket_type
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn remove_key(&self) -> bool {
        self.remove_key && !self.whole_message_key
    }

    /// Read `bucket_type`, `delimiter`, `whole_message_key` and `remove_key`,
    /// keeping the current values for anything missing or invalid
    pub fn configure(&mut self, conf: &StoreConf, category: &str) {
        if let Some(value) = conf.get_string("bucket_type") {
            match BucketType::parse(&value) {
                Some(bucket_type) => self.bucket_type = bucket_type,
                None => warn!(
                    "[{}] Bad config - unknown bucket_type '{}', using {}",
                    category, value, self.bucket_type
                ),
            }
        }

        if let Some(value) = conf.get_string("delimiter") {
            match parse_delimiter(&value) {
                Some(delimiter) => self.delimiter = delimiter,
                None => warn!(
                    "[{}] Bad config - delimiter '{}' must be a single character, using '{}'",
                    category,
                    value,
                    char::from(self.delimiter)
                ),
            }
        }

        if let Some(whole) = conf.get_bool("whole_message_key") {
            self.whole_message_key = whole;
        }

        if let Some(remove_key) = conf.get_bool("remove_key") {
            self.remove_key = remove_key;
        }
    }

    /// Routing key: the bytes before the first delimiter, or the whole
    /// message when `whole_message_key` is set. Empty messages have no key.
    pub fn key<'a>(&self, message: &'a [u8]) -> Option<&'a [u8]> {
        if self.whole_message_key {
            return Some(message).filter(|m| !m.is_empty());
        }
        message
            .iter()
            .position(|&b| b == self.delimiter)
            .map(|pos| &message[..pos])
    }

    /// Bucket index in `0..=num_buckets` for one message
    pub fn bucketize(&mut self, message: &[u8], num_buckets: usize) -> usize {
        if num_buckets == 0 {
            return 0;
        }

        match self.bucket_type {
            BucketType::Random => rand::thread_rng().gen_range(1..=num_buckets),
            BucketType::RoundRobin => {
                let index = 1 + self.next % num_buckets;
                self.next = self.next.wrapping_add(1);
                index
            }
            BucketType::KeyHash => match self.key(message) {
                Some(key) => 1 + ((self.hasher)(key) as usize) % num_buckets,
                None => 0,
            },
        }
    }

    /// Split `messages` into `num_buckets + 1` sub-batches, preserving order
    pub fn partition(&mut self, messages: MessageBatch, num_buckets: usize) -> Vec<MessageBatch> {
        let mut batches: Vec<MessageBatch> = vec![Vec::new(); num_buckets + 1];
        for entry in messages {
            let index = self.bucketize(&entry.message, num_buckets);
            batches[index].push(entry);
        }
        batches
    }

    /// Message body with the key and its delimiter removed. Messages without
    /// a delimiter are returned unchanged.
    pub fn strip_key(&self, message: &Bytes) -> Bytes {
        match message.iter().position(|&b| b == self.delimiter) {
            Some(pos) => message.slice(pos + 1..),
            None => message.clone(),
        }
    }

    /// Entries as they should be forwarded to a bucket
    ///
    /// With `remove_key` set every entry is a new `LogEntry`; the originals
    /// are left alone so they can be rehashed on retry.
    pub fn prepare(&self, batch: &[LogEntryPtr]) -> MessageBatch {
        if !self.remove_key() {
            return batch.to_vec();
        }
        batch
            .iter()
            .map(|entry| {
                Arc::new(LogEntry {
                    category: entry.category.clone(),
                    message: self.strip_key(&entry.message),
                })
            })
            .collect()
    }
}

/// Single character, or the decimal ASCII code older configs used
fn parse_delimiter(value: &str) -> Option<u8> {
    let bytes = value.as_bytes();
    if bytes.len() == 1 {
        return Some(bytes[0]);
    }
    value.trim().parse::<u8>().ok().filter(|code| code.is_ascii())
}
