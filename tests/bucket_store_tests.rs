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

mod common;

use common::*;
use log_relay::storage::djb2;
use log_relay::{BucketStore, BucketType, Bucketizer, LogEntry, MessageBatch, Store, StoreConf, StoreFactory};
use tempfile::TempDir;

fn keyed(keys: &[&str]) -> MessageBatch {
    keys.iter()
        .map(|key| LogEntry::shared("test", format!("{}:body", key)))
        .collect()
}

#[tokio::test]
async fn test_same_key_same_bucket() {
    let (buckets, states) = fake_buckets(4);
    let mut store = BucketStore::with_buckets("test", Bucketizer::new(BucketType::KeyHash), buckets);

    store.handle_messages(keyed(&["alpha"; 5])).await.unwrap();
    store.handle_messages(keyed(&["alpha"; 5])).await.unwrap();

    let expected = 1 + djb2(b"alpha") as usize % 4;
    assert_eq!(accepted_count(&states[expected]), 10);
    assert_eq!(all_accepted(&states).len(), 10);
}

#[tokio::test]
async fn test_round_robin_spreads_evenly() {
    let (buckets, states) = fake_buckets(3);
    let mut store = BucketStore::with_buckets("test", Bucketizer::new(BucketType::RoundRobin), buckets);

    store.handle_messages(messages("test", 12)).await.unwrap();

    assert_eq!(accepted_count(&states[0]), 0);
    for state in &states[1..] {
        assert_eq!(accepted_count(state), 4);
    }
}

#[tokio::test]
async fn test_random_never_uses_default_bucket() {
    let (buckets, states) = fake_buckets(3);
    let mut store = BucketStore::with_buckets("test", Bucketizer::new(BucketType::Random), buckets);

    store.handle_messages(messages("test", 100)).await.unwrap();

    assert_eq!(accepted_count(&states[0]), 0);
    assert_eq!(all_accepted(&states).len(), 100);
}

#[tokio::test]
async fn test_failed_bucket_returns_only_its_messages() {
    let (buckets, states) = fake_buckets(3);
    let mut store = BucketStore::with_buckets("test", Bucketizer::new(BucketType::RoundRobin), buckets);
    set_down(&states[2], true);

    let input = messages("test", 9);
    let unhandled = store.handle_messages(input.clone()).await.unwrap_err();

    let expected: MessageBatch = vec![input[1].clone(), input[4].clone(), input[7].clone()];
    assert_eq!(unhandled.messages, expected);
    assert_eq!(all_accepted(&states).len(), 6);
    assert_eq!(store.status(), "Failed write to 1 buckets");

    // No quarantine: the bucket is tried again on the next call
    set_down(&states[2], false);
    store.handle_messages(unhandled.into_messages()).await.unwrap();
    assert_eq!(all_accepted(&states).len(), 9);
    assert_eq!(store.status(), "");
}

#[tokio::test]
async fn test_returned_messages_keep_their_keys() {
    let (buckets, states) = fake_buckets(2);
    let bucketizer = Bucketizer::new(BucketType::KeyHash).with_remove_key(true);
    let mut store = BucketStore::with_buckets("test", bucketizer, buckets);
    for state in &states {
        set_down(state, true);
    }

    let input = keyed(&["a", "b", "c", "d"]);
    let unhandled = store.handle_messages(input.clone()).await.unwrap_err();

    assert_eq!(identities(&unhandled.messages), identities(&input));
}

#[tokio::test]
async fn test_open_failure_closes_all_buckets() {
    let (buckets, states) = fake_buckets(2);
    let mut store = BucketStore::with_buckets("test", Bucketizer::new(BucketType::KeyHash), buckets);
    set_down(&states[1], true);

    assert!(store.open().await.is_err());
    assert!(!store.is_open());
    assert_eq!(store.status(), "Failed to open bucket");
    for state in &states {
        assert!(state.lock().unwrap().close_calls >= 1);
    }
}

#[tokio::test]
async fn test_reports_open_after_lazy_reconnect() {
    let (buckets, states) = fake_buckets(2);
    let mut store = BucketStore::with_buckets("test", Bucketizer::new(BucketType::RoundRobin), buckets);
    store.open().await.unwrap();
    store.close().await;
    assert!(!store.is_open());

    store.handle_messages(messages("test", 4)).await.unwrap();
    assert!(store.is_open());
    assert_eq!(all_accepted(&states).len(), 4);
}

#[tokio::test]
async fn test_file_bucket_template() {
    let temp_dir = TempDir::new().unwrap();
    let yaml = format!(
        r#"
type: bucket
num_buckets: 2
bucket_type: key_hash
remove_key: yes
bucket:
  type: file
  file_path: {}
  base_filename: web
"#,
        temp_dir.path().display()
    );
    let conf = StoreConf::from_yaml(&yaml).unwrap();
    let mut store = StoreFactory::create(&conf, "web", false, None).unwrap();

    store.open().await.unwrap();
    store.handle_messages(keyed(&["user1", "user2", "user3"])).await.unwrap();
    store.handle_messages(messages("web", 1)).await.unwrap();
    store.close().await;

    for index in 0..=2 {
        assert!(temp_dir.path().join(format!("bucket{:03}", index)).is_dir());
    }

    let mut bodies = Vec::new();
    for index in 0..=2 {
        let dir = temp_dir.path().join(format!("bucket{:03}", index));
        for file in std::fs::read_dir(dir).unwrap() {
            let content = std::fs::read_to_string(file.unwrap().path()).unwrap();
            bodies.extend(content.lines().map(str::to_string));
        }
    }
    bodies.sort();
    assert_eq!(bodies, vec!["body", "body", "body", "message 0"]);

    // Keyless messages land in the default bucket
    let default_dir = temp_dir.path().join("bucket000");
    let default_content: String = std::fs::read_dir(default_dir)
        .unwrap()
        .map(|f| std::fs::read_to_string(f.unwrap().path()).unwrap())
        .collect();
    assert_eq!(default_content, "message 0\n");
}

#[test]
fn test_bad_config_sets_status() {
    let conf = StoreConf::from_yaml("type: bucket\nbucket_type: key_hash\n").unwrap();
    let store = StoreFactory::create(&conf, "test", false, None).unwrap();
    assert_eq!(store.status(), "Bad config for bucket store");
}
