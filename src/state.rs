//! Durable run state: the stage checkpoint and the download log.
//!
//! Both are small JSON documents persisted through a [`StateStore`], a file
//! directory in production and a map in tests.

use log::debug;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::utils::{ensure_directory, write_atomic};

pub const CHECKPOINT_KEY: &str = "last_execution.json";
pub const DOWNLOAD_LOG_KEY: &str = "downloaded_videos.json";

/// Keyed document storage.
pub trait StateStore {
    /// The document under `key`, `None` if it was never stored.
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn store(&self, key: &str, contents: &str) -> Result<()>;
}

/// One file per key inside a directory, replaced atomically on every store.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, key: &str, contents: &str) -> Result<()> {
        ensure_directory(&self.dir)?;
        write_atomic(&self.path_for(key), contents.as_bytes())?;
        debug!("Stored {}", self.path_for(key).display());
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RefCell<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.docs.borrow().get(key).cloned())
    }

    fn store(&self, key: &str, contents: &str) -> Result<()> {
        self.docs
            .borrow_mut()
            .insert(key.to_string(), contents.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failure,
}

/// Last recorded outcome of every stage, plus when it was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepStatus>,
}

impl CheckpointState {
    /// The stored checkpoint, or an empty one on first run.
    pub fn load(store: &dyn StateStore) -> Result<Self> {
        match store.load(CHECKPOINT_KEY)? {
            Some(contents) => Ok(serde_json::from_str(&contents)?),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &dyn StateStore) -> Result<()> {
        store.store(CHECKPOINT_KEY, &serde_json::to_string_pretty(self)?)
    }

    pub fn status(&self, stage: &str) -> Option<StepStatus> {
        self.steps.get(stage).copied()
    }

    /// Record `status` for `stage` and stamp `last_run`.
    pub fn record(&mut self, stage: &str, status: StepStatus, now: String) {
        self.steps.insert(stage.to_string(), status);
        self.last_run = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Every remote video fetched so far, in download order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadLog {
    pub records: Vec<DownloadRecord>,
}

impl DownloadLog {
    pub fn load(store: &dyn StateStore) -> Result<Self> {
        match store.load(DOWNLOAD_LOG_KEY)? {
            Some(contents) => Ok(serde_json::from_str(&contents)?),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &dyn StateStore) -> Result<()> {
        store.store(DOWNLOAD_LOG_KEY, &serde_json::to_string_pretty(self)?)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn push(&mut self, record: DownloadRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_serializes_lowercase_statuses() {
        let mut state = CheckpointState::default();
        state.record("process_videos", StepStatus::Success, "2024-05-01T10:00:00.000000".into());
        state.record("upload_labels", StepStatus::Failure, "2024-05-01T10:05:00.000000".into());

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_run"], "2024-05-01T10:05:00.000000");
        assert_eq!(json["steps"]["process_videos"], "success");
        assert_eq!(json["steps"]["upload_labels"], "failure");
    }

    #[test]
    fn file_store_round_trips_through_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(&dir.path().join("data"));
        assert!(CheckpointState::load(&store).unwrap().steps.is_empty());

        let mut state = CheckpointState::default();
        state.record("download_videos", StepStatus::Success, "now".into());
        state.save(&store).unwrap();

        assert!(store.path_for(CHECKPOINT_KEY).is_file());
        assert_eq!(CheckpointState::load(&store).unwrap(), state);
    }

    #[test]
    fn download_log_is_a_plain_json_array() {
        let store = MemoryStore::new();
        let mut log = DownloadLog::default();
        log.push(DownloadRecord {
            id: "abc".into(),
            title: "Match".into(),
            url: "https://example.com/abc".into(),
        });
        log.save(&store).unwrap();

        let raw = store.load(DOWNLOAD_LOG_KEY).unwrap().unwrap();
        assert!(raw.trim_start().starts_with('['));
        let loaded = DownloadLog::load(&store).unwrap();
        assert!(loaded.contains("abc"));
        assert!(!loaded.contains("xyz"));
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let store = MemoryStore::new();
        store.store(CHECKPOINT_KEY, "{not json").unwrap();
        assert!(CheckpointState::load(&store).is_err());
    }
}
