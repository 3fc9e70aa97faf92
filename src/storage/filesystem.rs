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

// File store: appends messages to dated, size-rotated files

use super::backend::{HandleResult, Store, StoreCore, Unhandled};
use crate::config::StoreConf;
use crate::message::MessageBatch;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_SIZE: u64 = 1_000_000_000;

/// Writes to `<file_path>/<base_filename>_<YYYY-MM-DD>_<NNNNN>`
///
/// A new file is started when the date changes or the current file reaches
/// `max_size` bytes.
pub struct FileStore {
    core: StoreCore,
    file_path: Option<PathBuf>,
    base_filename: Option<String>,
    add_newlines: bool,
    max_size: u64,

    file: Option<fs::File>,
    current_path: Option<PathBuf>,
    current_size: u64,
    current_date: Option<NaiveDate>,
    suffix: u32,
}

impl FileStore {
    pub fn new(category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(category, "file", multi_category),
            file_path: None,
            base_filename: None,
            add_newlines: true,
            max_size: DEFAULT_MAX_SIZE,
            file: None,
            current_path: None,
            current_size: 0,
            current_date: None,
            suffix: 0,
        }
    }

    /// File currently written to, if open
    pub fn current_file(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    fn base_filename(&self) -> &str {
        self.base_filename
            .as_deref()
            .unwrap_or_else(|| self.core.category())
    }

    fn file_name(&self, date: NaiveDate, suffix: u32) -> String {
        format!(
            "{}_{}_{:05}",
            self.base_filename(),
            date.format("%Y-%m-%d"),
            suffix
        )
    }

    /// Ensure base directory exists
    async fn ensure_base_directory(&self, base_path: &Path) -> Result<()> {
        if !base_path.exists() {
            info!("Creating base directory: {}", base_path.display());
            fs::create_dir_all(base_path)
                .await
                .context("Failed to create base directory")?;
        }
        Ok(())
    }

    /// Open the first file for `date` at or after `suffix` that still has room
    async fn open_file(&mut self, date: NaiveDate, mut suffix: u32) -> Result<()> {
        let base_path = self
            .file_path
            .clone()
            .context("file_path not configured")?;
        self.ensure_base_directory(&base_path).await?;

        loop {
            let path = base_path.join(self.file_name(date, suffix));
            let existing = match fs::metadata(&path).await {
                Ok(metadata) => metadata.len(),
                Err(_) => 0,
            };
            if existing >= self.max_size {
                suffix += 1;
                continue;
            }

            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .context(format!("Failed to open file: {}", path.display()))?;

            info!("[{}] Opened file {}", self.core.category(), path.display());
            self.file = Some(file);
            self.current_path = Some(path);
            self.current_size = existing;
            self.current_date = Some(date);
            self.suffix = suffix;
            return Ok(());
        }
    }

    /// Start the next file: next suffix on the same day, suffix 0 on a new day
    async fn rotate(&mut self) -> Result<()> {
        let today = Local::now().date_naive();
        let suffix = if self.current_date == Some(today) {
            self.suffix + 1
        } else {
            0
        };
        self.close().await;
        self.open_file(today, suffix).await
    }

    fn encode(&self, messages: &MessageBatch) -> Vec<u8> {
        let mut data = Vec::with_capacity(messages.iter().map(|m| m.len() + 1).sum());
        for entry in messages {
            data.extend_from_slice(&entry.message);
            if self.add_newlines && !entry.message.ends_with(b"\n") {
                data.push(b'\n');
            }
        }
        data
    }
}

#[async_trait]
impl Store for FileStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StoreCore {
        &mut self.core
    }

    fn configure(&mut self, conf: &StoreConf, parent: Option<&StoreConf>) {
        let conf = conf.inherit(parent);

        match conf.get_string("file_path") {
            Some(path) => self.file_path = Some(PathBuf::from(path)),
            None => {
                error!("[{}] Bad config - file_path not set", self.core.category());
                self.set_status("Bad config - file_path not set");
            }
        }

        self.base_filename = conf.get_string("base_filename");
        self.add_newlines = conf.get_bool("add_newlines").unwrap_or(true);
        self.max_size = match conf.get_int("max_size") {
            Some(size) if size > 0 => size as u64,
            Some(size) => {
                warn!(
                    "[{}] Bad config - max_size {} must be > 0, using {}",
                    self.core.category(),
                    size,
                    DEFAULT_MAX_SIZE
                );
                DEFAULT_MAX_SIZE
            }
            None => DEFAULT_MAX_SIZE,
        };
    }

    async fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        match self.open_file(Local::now().date_naive(), 0).await {
            Ok(()) => {
                self.set_status("");
                Ok(())
            }
            Err(e) => {
                self.set_status("File open error");
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                warn!("[{}] Failed to flush file on close: {}", self.core.category(), e);
            }
            debug!("[{}] Closed file", self.core.category());
        }
        self.current_path = None;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    async fn handle_messages(&mut self, messages: MessageBatch) -> HandleResult {
        if let Err(e) = self.open().await {
            error!("[{}] Failed to open file: {:#}", self.core.category(), e);
            return Err(Unhandled::new(format!("{:#}", e), messages));
        }

        if self.current_date != Some(Local::now().date_naive()) {
            if let Err(e) = self.rotate().await {
                self.set_status("File open error");
                return Err(Unhandled::new(format!("{:#}", e), messages));
            }
        }

        let data = self.encode(&messages);
        let result = match self.file.as_mut() {
            Some(file) => match file.write_all(&data).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            },
            None => return Err(Unhandled::new("file not open", messages)),
        };

        if let Err(e) = result {
            error!(
                "[{}] Failed to write {} bytes: {}",
                self.core.category(),
                data.len(),
                e
            );
            self.close().await;
            self.set_status("File write error");
            return Err(Unhandled::new(format!("write failed: {}", e), messages));
        }

        self.current_size += data.len() as u64;
        debug!(
            "[{}] Wrote {} messages ({} bytes)",
            self.core.category(),
            messages.len(),
            data.len()
        );
        self.set_status("");

        if self.current_size >= self.max_size {
            if let Err(e) = self.rotate().await {
                warn!("[{}] Failed to rotate file: {:#}", self.core.category(), e);
            }
        }

        Ok(())
    }

    async fn periodic_check(&mut self) {
        if self.file.is_some() && self.current_date != Some(Local::now().date_naive()) {
            if let Err(e) = self.rotate().await {
                warn!("[{}] Failed to rotate file: {:#}", self.core.category(), e);
                self.set_status("File open error");
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await.context("Failed to flush file")?;
        }
        Ok(())
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = FileStore::new(category, self.core.multi_category());
        store.file_path = self.file_path.clone();
        store.base_filename = self.base_filename.clone();
        store.add_newlines = self.add_newlines;
        store.max_size = self.max_size;
        Box::new(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LogEntry;
    use tempfile::TempDir;

    fn create_test_store(dir: &Path, configure: impl FnOnce(&mut StoreConf)) -> FileStore {
        let mut conf = StoreConf::new();
        conf.set("type", "file")
            .set("file_path", dir.to_string_lossy().to_string());
        configure(&mut conf);

        let mut store = FileStore::new("test", false);
        store.configure(&conf, None);
        store
    }

    fn batch(messages: &[&str]) -> MessageBatch {
        messages
            .iter()
            .map(|m| LogEntry::shared("test", m.as_bytes().to_vec()))
            .collect()
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("nested/logs");
        let mut store = create_test_store(&base, |_| {});

        store.open().await.unwrap();
        assert!(base.exists());
        assert!(store.is_open());

        let name = store.current_file().unwrap().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("test_"));
        assert!(name.ends_with("_00000"));
    }

    #[tokio::test]
    async fn test_write_messages() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = create_test_store(temp_dir.path(), |_| {});

        store.handle_messages(batch(&["first", "second\n"])).await.unwrap();
        store.handle_messages(batch(&["third"])).await.unwrap();

        let content = std::fs::read_to_string(store.current_file().unwrap()).unwrap();
        assert_eq!(content, "first\nsecond\nthird\n");
        assert_eq!(store.status(), "");
    }

    #[tokio::test]
    async fn test_without_newlines() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = create_test_store(temp_dir.path(), |conf| {
            conf.set("add_newlines", "no");
        });

        store.handle_messages(batch(&["a", "b"])).await.unwrap();

        let content = std::fs::read_to_string(store.current_file().unwrap()).unwrap();
        assert_eq!(content, "ab");
    }

    #[tokio::test]
    async fn test_rotation_on_max_size() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = create_test_store(temp_dir.path(), |conf| {
            conf.set("max_size", 10);
        });

        for _ in 0..3 {
            store.handle_messages(batch(&["12345678"])).await.unwrap();
        }

        let files = files_in(temp_dir.path());
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read(&files[0]).unwrap().len(), 18);
        assert_eq!(std::fs::read(&files[1]).unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_open_failure_returns_messages() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let mut store = create_test_store(&blocker.join("logs"), |_| {});

        let messages = batch(&["a", "b"]);
        let unhandled = store.handle_messages(messages.clone()).await.unwrap_err();
        assert_eq!(unhandled.messages, messages);
        assert_eq!(store.status(), "File open error");
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn test_missing_file_path() {
        let mut store = FileStore::new("test", false);
        store.configure(&StoreConf::new(), None);

        assert_eq!(store.status(), "Bad config - file_path not set");
        assert!(store.open().await.is_err());
    }

    #[tokio::test]
    async fn test_copy_uses_new_category() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(temp_dir.path(), |_| {});

        let mut copy = store.copy("other");
        copy.handle_messages(batch(&["x"])).await.unwrap();

        let files = files_in(temp_dir.path());
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("other_"));
        assert!(!store.is_open());
    }
}
