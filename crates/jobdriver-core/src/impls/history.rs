//! HistoryWriter implementations.
//!
//! - `InMemoryHistory`: Vec behind a lock.
//! - `FileHistory`: one JSON object per line, appended. `prune` rewrites the
//!   file atomically.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::persistence::{atomic_write, read_if_exists};
use crate::domain::{HistoryEntry, HistoryError, HistoryFilter};
use crate::ports::HistoryWriter;

#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl HistoryWriter for InMemoryHistory {
    async fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, HistoryError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.finished_at >= cutoff);
        Ok(before - entries.len())
    }
}

/// JSON lines on disk.
#[derive(Debug)]
pub struct FileHistory {
    path: PathBuf,
    // append と prune の書き込みを直列化する
    write_lock: Mutex<()>,
}

impl FileHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let Some(bytes) = read_if_exists(&self.path).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut entries = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                // a torn last line from a crash mid-append
                Err(e) if e.is_eof() => {
                    tracing::warn!(path = %self.path.display(), "skipping truncated history line");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl HistoryWriter for FileHistory {
    async fn append(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, HistoryError> {
        let _guard = self.write_lock.lock().await;
        let entries = self.read_all().await?;
        let before = entries.len();
        let kept: Vec<HistoryEntry> = entries
            .into_iter()
            .filter(|e| e.finished_at >= cutoff)
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut content = Vec::new();
        for entry in &kept {
            content.extend(serde_json::to_vec(entry)?);
            content.push(b'\n');
        }
        atomic_write(&self.path, &content).await?;
        Ok(removed)
    }
}
