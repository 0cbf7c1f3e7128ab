//! JSON-lines file sink
//!
//! Records for one server go to `<dir>/<id>_<YYYYMMDD_HH>.json`, a new file per UTC
//! hour. `clean` removes this server's files whose hour is older than the retention.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::{Sink, SinkError, SinkResult};
use crate::transform::RecordKind;

const HOUR_FORMAT: &str = "%Y%m%d_%H";

struct OpenFile {
    hour: String,
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct FileSink {
    name: String,
    dir: PathBuf,
    retain_hours: Option<u64>,
    id: Option<String>,
    current: Option<OpenFile>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: format!("file:{}", dir.display()),
            dir,
            retain_hours: None,
            id: None,
            current: None,
        }
    }

    pub fn with_retention(mut self, retain_hours: Option<u64>) -> Self {
        self.retain_hours = retain_hours;
        self
    }

    /// Path of the file currently being written, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|f| f.path.as_path())
    }

    fn hour_stamp(at: DateTime<Utc>) -> String {
        at.format(HOUR_FORMAT).to_string()
    }

    /// Inverse of the file naming scheme; `None` for files this sink did not write
    fn hour_of(id: &str, file_name: &str) -> Option<NaiveDateTime> {
        let stamp = file_name
            .strip_prefix(id)?
            .strip_prefix('_')?
            .strip_suffix(".json")?;
        NaiveDateTime::parse_from_str(&format!("{}0000", stamp), "%Y%m%d_%H%M%S").ok()
    }

    async fn rotate(&mut self, id: &str, hour: String) -> SinkResult<()> {
        if let Some(mut previous) = self.current.take() {
            previous.writer.flush().await?;
            previous.writer.get_mut().sync_all().await?;
        }

        let path = self.dir.join(format!("{}_{}.json", id, hour));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(sink = %self.name, path = %path.display(), "opened output file");

        self.current = Some(OpenFile {
            hour,
            path,
            writer: BufWriter::new(file),
        });
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self, id: &str) -> SinkResult<()> {
        if id.is_empty() {
            return Err(SinkError::Rejected("empty sink id".to_string()));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        self.id = Some(id.to_string());
        Ok(())
    }

    async fn write(&mut self, _kind: RecordKind, line: &str) -> SinkResult<u64> {
        let id = self.id.clone().ok_or(SinkError::NotOpen)?;

        let hour = Self::hour_stamp(Utc::now());
        if self.current.as_ref().map(|f| f.hour.as_str()) != Some(hour.as_str()) {
            self.rotate(&id, hour).await?;
        }

        let current = self.current.as_mut().ok_or(SinkError::NotOpen)?;
        current.writer.write_all(line.as_bytes()).await?;
        current.writer.write_all(b"\n").await?;
        Ok(line.len() as u64 + 1)
    }

    async fn flush(&mut self) -> SinkResult<()> {
        if let Some(current) = self.current.as_mut() {
            current.writer.flush().await?;
            current.writer.get_mut().sync_all().await?;
        }
        Ok(())
    }

    async fn clean(&mut self) -> SinkResult<()> {
        let (Some(hours), Some(id)) = (self.retain_hours, self.id.as_deref()) else {
            return Ok(());
        };
        let Some(cutoff) = i64::try_from(hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|keep| Utc::now().naive_utc().checked_sub_signed(keep))
        else {
            return Ok(());
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(hour) = Self::hour_of(id, name) else {
                continue;
            };
            if hour >= cutoff {
                continue;
            }
            if self.current.as_ref().is_some_and(|f| f.path == entry.path()) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => debug!(sink = %self.name, file = name, "removed expired file"),
                Err(e) => warn!(sink = %self.name, file = name, error = %e, "failed to remove expired file"),
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> SinkResult<()> {
        let result = self.flush().await;
        self.current = None;
        self.id = None;
        result
    }
}
