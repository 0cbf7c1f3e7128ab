//! Durable per-source cursor
//!
//! Two writes with different meaning:
//!
//! - [`CheckpointStore::save`] runs after every scanned row and records progress
//!   (`pending_cursor`) without touching the committed cursor
//! - [`CheckpointStore::commit`] runs once, after every sink flushed and cleaned, and
//!   sets the cursor the next run resumes from
//!
//! The committed cursor never moves backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::identity::{path_safe, SourceIdentity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointState {
    #[default]
    Success,
    Failure,
}

/// Persisted checkpoint document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last committed cursor, 0 when the source has never been committed
    pub cursor: i64,
    pub state: CheckpointState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
    /// Highest cursor saved since the last commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_cursor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Storage seam for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Committed cursor and metadata; a default checkpoint when none exists
    async fn read_offset(&self, identity: &SourceIdentity) -> Result<Checkpoint>;

    /// Record per-row progress
    async fn save(
        &self,
        identity: &SourceIdentity,
        batch_key: &str,
        cursor: i64,
        state: CheckpointState,
    ) -> Result<()>;

    /// Advance the resume point
    async fn commit(
        &self,
        identity: &SourceIdentity,
        batch_key: &str,
        cursor: i64,
        state: CheckpointState,
    ) -> Result<()>;

    /// Carry over a checkpoint written under an older naming scheme
    ///
    /// Returns true when something was migrated.
    async fn migrate_legacy(&self, _prefix: &str, _identity: &SourceIdentity) -> Result<bool> {
        Ok(false)
    }
}

/// One JSON document per source identity under a state directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, identity: &SourceIdentity) -> PathBuf {
        self.dir.join(format!("{}.json", identity.key()))
    }

    /// File name used before checkpoints were keyed by domain and class
    pub fn legacy_path_for(&self, prefix: &str, identity: &SourceIdentity) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.json",
            path_safe(prefix),
            path_safe(&identity.server),
            path_safe(&identity.session)
        ))
    }

    async fn load(&self, identity: &SourceIdentity, op: &'static str) -> Result<Checkpoint> {
        let path = self.path_for(identity);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| IngestError::checkpoint(op, identity.key(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Checkpoint::default()),
            Err(e) => Err(IngestError::checkpoint(op, identity.key(), e)),
        }
    }

    /// Write through a temp file and rename so a crash never leaves a torn document
    async fn store(
        &self,
        identity: &SourceIdentity,
        checkpoint: &Checkpoint,
        op: &'static str,
    ) -> Result<()> {
        let key = identity.key();
        let path = self.path_for(identity);
        let tmp = self.dir.join(format!("{}.json.tmp", key));

        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| IngestError::checkpoint(op, key.as_str(), e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| IngestError::checkpoint(op, key.as_str(), e))?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| IngestError::checkpoint(op, key.as_str(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| IngestError::checkpoint(op, key.as_str(), e))?;

        Ok(())
    }

    /// Every checkpoint in the state directory, sorted by key
    pub async fn list(&self) -> Result<Vec<(String, Checkpoint)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IngestError::checkpoint("list", self.dir.display().to_string(), e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(key) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
                .filter(|k| k.contains("__"))
                .map(str::to_string)
            else {
                continue;
            };
            let content = tokio::fs::read_to_string(&path).await?;
            let checkpoint: Checkpoint = serde_json::from_str(&content)
                .map_err(|e| IngestError::checkpoint("list", key.as_str(), e))?;
            found.push((key, checkpoint));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read_offset(&self, identity: &SourceIdentity) -> Result<Checkpoint> {
        self.load(identity, "read").await
    }

    async fn save(
        &self,
        identity: &SourceIdentity,
        batch_key: &str,
        cursor: i64,
        state: CheckpointState,
    ) -> Result<()> {
        let mut checkpoint = self.load(identity, "save").await?;
        checkpoint.batch_key = Some(batch_key.to_string());
        checkpoint.pending_cursor = Some(cursor);
        checkpoint.saved_at = Some(Utc::now());
        checkpoint.state = state;
        self.store(identity, &checkpoint, "save").await
    }

    async fn commit(
        &self,
        identity: &SourceIdentity,
        batch_key: &str,
        cursor: i64,
        state: CheckpointState,
    ) -> Result<()> {
        let mut checkpoint = self.load(identity, "commit").await?;
        if cursor < checkpoint.cursor {
            return Err(IngestError::checkpoint(
                "commit",
                identity.key(),
                format!(
                    "cursor would regress from {} to {}",
                    checkpoint.cursor, cursor
                ),
            ));
        }

        checkpoint.cursor = cursor;
        checkpoint.state = state;
        checkpoint.batch_key = Some(batch_key.to_string());
        checkpoint.committed_at = Some(Utc::now());
        checkpoint.pending_cursor = None;
        self.store(identity, &checkpoint, "commit").await?;

        debug!(source = %identity, cursor, "checkpoint committed");
        Ok(())
    }

    async fn migrate_legacy(&self, prefix: &str, identity: &SourceIdentity) -> Result<bool> {
        let legacy = self.legacy_path_for(prefix, identity);
        let current = self.path_for(identity);

        if !tokio::fs::try_exists(&legacy).await? || tokio::fs::try_exists(&current).await? {
            return Ok(false);
        }

        tokio::fs::rename(&legacy, &current)
            .await
            .map_err(|e| IngestError::checkpoint("migrate", identity.key(), e))?;
        info!(
            source = %identity,
            from = %legacy.display(),
            "migrated legacy checkpoint file"
        );
        Ok(true)
    }
}
