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

// Network store: forwards batches to a downstream relay over HTTP

use super::backend::{HandleResult, Store, StoreCore, Unhandled};
use crate::config::StoreConf;
use crate::message::{LogEntry, MessageBatch};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_REMOTE_PORT: i64 = 1463;
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// One entry on the wire. UTF-8 payloads travel as `message`, anything else
/// as the raw bytes in `message_bytes`.
#[derive(Serialize)]
struct WireEntry<'a> {
    category: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_bytes: Option<&'a [u8]>,
}

impl<'a> WireEntry<'a> {
    fn from_entry(entry: &'a LogEntry) -> Self {
        match std::str::from_utf8(&entry.message) {
            Ok(message) => Self {
                category: &entry.category,
                message: Some(message),
                message_bytes: None,
            },
            Err(_) => Self {
                category: &entry.category,
                message: None,
                message_bytes: Some(&entry.message[..]),
            },
        }
    }
}

#[derive(Serialize)]
struct LogRequest<'a> {
    messages: Vec<WireEntry<'a>>,
}

pub struct NetworkStore {
    core: StoreCore,
    base_url: Option<String>,
    timeout: Duration,
    client: Option<Client>,
}

impl NetworkStore {
    pub fn new(category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(category, "network", multi_category),
            base_url: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            client: None,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_client(&self) -> Result<Client> {
        reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")
    }

    async fn send(&self, messages: &MessageBatch) -> Result<()> {
        let (Some(client), Some(base_url)) = (self.client.as_ref(), self.base_url.as_deref())
        else {
            bail!("not connected");
        };

        let body = LogRequest {
            messages: messages.iter().map(|entry| WireEntry::from_entry(entry)).collect(),
        };

        let response = client
            .post(format!("{}/log", base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("Remote write failed with status {}: {}", status, error_text);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for NetworkStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StoreCore {
        &mut self.core
    }

    fn configure(&mut self, conf: &StoreConf, parent: Option<&StoreConf>) {
        let conf = conf.inherit(parent);

        self.base_url = match conf.get_string("remote_url") {
            Some(url) => Some(url.trim_end_matches('/').to_string()),
            None => match conf.get_string("remote_host") {
                Some(host) => {
                    let port = conf.get_int("remote_port").unwrap_or(DEFAULT_REMOTE_PORT);
                    Some(format!("http://{}:{}", host, port))
                }
                None => {
                    error!("[{}] Bad config - remote_host not set", self.core.category());
                    self.set_status("Bad config - remote_host not set");
                    None
                }
            },
        };

        self.timeout = match conf.get_int("timeout_ms") {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            Some(ms) => {
                warn!(
                    "[{}] Bad config - timeout_ms {} must be > 0, using {}",
                    self.core.category(),
                    ms,
                    DEFAULT_TIMEOUT_MS
                );
                Duration::from_millis(DEFAULT_TIMEOUT_MS)
            }
            None => Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };
    }

    /// Connects and probes `<url>/status`
    async fn open(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let Some(base_url) = self.base_url.clone() else {
            self.set_status("Bad config - remote_host not set");
            bail!("[{}] remote url not configured", self.core.category());
        };

        let client = self.build_client()?;
        let probe = client
            .get(format!("{}/status", base_url))
            .send()
            .await
            .context(format!("Failed to connect to {}", base_url));

        match probe {
            Ok(response) if response.status().is_success() => {
                info!("[{}] Connected to {}", self.core.category(), base_url);
                self.client = Some(client);
                self.set_status("");
                Ok(())
            }
            Ok(response) => {
                self.set_status("Failed to connect");
                bail!("{} answered status probe with {}", base_url, response.status())
            }
            Err(e) => {
                self.set_status("Failed to connect");
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            debug!("[{}] Disconnected", self.core.category());
        }
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn handle_messages(&mut self, messages: MessageBatch) -> HandleResult {
        if let Err(e) = self.open().await {
            warn!("[{}] Cannot connect: {:#}", self.core.category(), e);
            return Err(Unhandled::new(format!("{:#}", e), messages));
        }

        match self.send(&messages).await {
            Ok(()) => {
                debug!(
                    "[{}] Forwarded {} messages",
                    self.core.category(),
                    messages.len()
                );
                self.set_status("");
                Ok(())
            }
            Err(e) => {
                warn!(
                    "[{}] Failed to forward {} messages: {:#}",
                    self.core.category(),
                    messages.len(),
                    e
                );
                self.close().await;
                self.set_status("Failed to send");
                Err(Unhandled::new(format!("{:#}", e), messages))
            }
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = NetworkStore::new(category, self.core.multi_category());
        store.base_url = self.base_url.clone();
        store.timeout = self.timeout;
        Box::new(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LogEntry;

    fn unreachable_store() -> NetworkStore {
        let mut conf = StoreConf::new();
        conf.set("type", "network")
            .set("remote_url", "http://127.0.0.1:1/")
            .set("timeout_ms", 200);
        let mut store = NetworkStore::new("test", false);
        store.configure(&conf, None);
        store
    }

    #[test]
    fn test_configure_host_and_port() {
        let mut conf = StoreConf::new();
        conf.set("remote_host", "relay.local");
        let mut store = NetworkStore::new("test", false);
        store.configure(&conf, None);

        assert_eq!(store.base_url(), Some("http://relay.local:1463"));
        assert_eq!(store.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_configure_url_wins() {
        let store = unreachable_store();
        assert_eq!(store.base_url(), Some("http://127.0.0.1:1"));
        assert_eq!(store.timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_missing_remote() {
        let mut store = NetworkStore::new("test", false);
        store.configure(&StoreConf::new(), None);
        assert_eq!(store.status(), "Bad config - remote_host not set");
    }

    #[tokio::test]
    async fn test_open_unreachable() {
        let mut store = unreachable_store();
        assert!(store.open().await.is_err());
        assert!(!store.is_open());
        assert_eq!(store.status(), "Failed to connect");
    }

    #[tokio::test]
    async fn test_unreachable_returns_batch() {
        let mut store = unreachable_store();
        let batch = vec![LogEntry::shared("test", "a"), LogEntry::shared("test", "b")];

        let unhandled = store.handle_messages(batch.clone()).await.unwrap_err();
        assert_eq!(unhandled.messages, batch);
    }

    #[test]
    fn test_wire_format() {
        let entry = LogEntry::new("web", "GET /");
        let body = LogRequest {
            messages: vec![WireEntry::from_entry(&entry)],
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"messages": [{"category": "web", "message": "GET /"}]})
        );
    }

    #[test]
    fn test_binary_payload_kept_byte_for_byte() {
        let text = LogEntry::new("web", "ok");
        let binary = LogEntry::new("bin", vec![0xff, 0xfe, b'A']);
        let body = LogRequest {
            messages: vec![WireEntry::from_entry(&text), WireEntry::from_entry(&binary)],
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"messages": [
                {"category": "web", "message": "ok"},
                {"category": "bin", "message_bytes": [255, 254, 65]},
            ]})
        );

        let bytes: Vec<u8> =
            serde_json::from_value(json["messages"][1]["message_bytes"].clone()).unwrap();
        assert_eq!(&bytes[..], &binary.message[..]);
    }

    #[test]
    fn test_copy_keeps_remote() {
        let store = unreachable_store();
        let copy = store.copy("other");
        assert_eq!(copy.category(), "other");
        assert_eq!(copy.store_type(), "network");
    }
}
