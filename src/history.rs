//! Run history store.
//!
//! Append-only log of run records, queried by the aggregator for dedup-window
//! lookups. Single-writer discipline: only the orchestrator appends, at run
//! end. Lookups return the keys that were actually notified, so a suppressed
//! finding never extends its own cool-down window.

use crate::error::HistoryError;
use crate::types::{DedupKey, RunRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait RunHistory: Send + Sync {
    /// Append one completed run record
    async fn append(&self, record: &RunRecord) -> Result<(), HistoryError>;

    /// Dedup keys notified by runs that started strictly after `cutoff`
    async fn notified_keys_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<HashSet<DedupKey>, HistoryError>;
}

/// Ephemeral store for tests and one-shot runs
pub struct InMemoryHistory {
    records: RwLock<Vec<RunRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunHistory for InMemoryHistory {
    async fn append(&self, record: &RunRecord) -> Result<(), HistoryError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn notified_keys_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<HashSet<DedupKey>, HistoryError> {
        let records = self.records.read().await;
        Ok(keys_after(records.iter(), cutoff))
    }
}

/// Durable JSON-lines store, one record per line
pub struct FileHistory {
    path: PathBuf,
}

impl FileHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<RunRecord>, HistoryError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    /// Drop records older than `cutoff`; history before the dedup window is
    /// never consulted again
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, HistoryError> {
        let records = self.load().await?;
        let retained: Vec<&RunRecord> = records
            .iter()
            .filter(|r| r.started_at > cutoff)
            .collect();
        let dropped = records.len() - retained.len();
        if dropped == 0 {
            return Ok(0);
        }

        let mut buf = String::new();
        for record in &retained {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        tokio::fs::write(&self.path, buf).await?;
        debug!(dropped = dropped, "Pruned run history");
        Ok(dropped)
    }
}

#[async_trait]
impl RunHistory for FileHistory {
    async fn append(&self, record: &RunRecord) -> Result<(), HistoryError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn notified_keys_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<HashSet<DedupKey>, HistoryError> {
        let records = self.load().await?;
        Ok(keys_after(records.iter(), cutoff))
    }
}

fn keys_after<'a>(
    records: impl Iterator<Item = &'a RunRecord>,
    cutoff: DateTime<Utc>,
) -> HashSet<DedupKey> {
    records
        .filter(|r| r.started_at > cutoff)
        .flat_map(|r| r.notified.iter().cloned())
        .collect()
}
