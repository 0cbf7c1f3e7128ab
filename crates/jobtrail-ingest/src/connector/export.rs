//! Connector over job history exported to disk
//!
//! Layout, one directory per server under the export root:
//!
//! ```text
//! <export_dir>/<fqdn>/server.json      ServerInfo plus utc_offset_minutes
//! <export_dir>/<fqdn>/history.jsonl    one job history row per line
//! ```
//!
//! Rows carry the raw `run_date`/`run_time` integers; the UTC time is derived from the
//! server's offset unless the row already has `timestamp_utc`.

use async_trait::async_trait;
use chrono::Duration;
use jobtrail_common::time;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{parse_agent_time, ConnectorFactory, SourceConnector};
use crate::config::SourceConfig;
use crate::error::{IngestError, Result};
use crate::identity::{path_safe, ServerInfo};
use crate::transform::RawEvent;

pub const SERVER_FILE: &str = "server.json";
pub const HISTORY_FILE: &str = "history.jsonl";

/// `server.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedServer {
    #[serde(flatten)]
    pub info: ServerInfo,
    /// Local time minus UTC, in minutes
    #[serde(default)]
    pub utc_offset_minutes: i64,
}

/// One line of `history.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRow {
    pub instance_id: i64,
    pub job_id: String,
    pub step_id: i32,
    #[serde(default)]
    pub step_name: String,
    pub job_name: String,
    #[serde(default)]
    pub message: String,
    pub run_status: i32,
    pub run_date: i32,
    pub run_time: i32,
    #[serde(default)]
    pub run_duration: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_utc: Option<String>,
}

impl ExportedRow {
    fn into_event(self, utc_offset: Duration) -> Result<RawEvent> {
        let local = parse_agent_time(self.run_date, self.run_time).map_err(|e| {
            IngestError::ScanDecode {
                cursor: self.instance_id,
                reason: e.to_string(),
            }
        })?;

        let timestamp_utc = match self.timestamp_utc {
            Some(text) => text,
            None => {
                let utc = local
                    .checked_sub_signed(utc_offset)
                    .ok_or_else(|| IngestError::ScanDecode {
                        cursor: self.instance_id,
                        reason: "utc offset out of range".to_string(),
                    })?;
                time::format_utc(&utc.and_utc())
            },
        };

        Ok(RawEvent {
            instance_id: self.instance_id,
            job_id: self.job_id,
            step_id: self.step_id,
            step_name: self.step_name,
            job_name: self.job_name,
            message: self.message,
            run_status: self.run_status,
            run_duration: self.run_duration,
            timestamp_local: local,
            timestamp_utc,
        })
    }
}

pub struct ExportConnector {
    server: ExportedServer,
    /// Sorted by `instance_id`
    rows: Vec<ExportedRow>,
}

impl ExportConnector {
    /// Load the export of `fqdn`; a missing directory means the server is unreachable
    pub async fn open(export_dir: &Path, fqdn: &str) -> Result<Self> {
        let dir = export_dir.join(path_safe(fqdn));
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(IngestError::connectivity(
                fqdn,
                format!("no export directory at {}", dir.display()),
            ));
        }

        let server_text = tokio::fs::read_to_string(dir.join(SERVER_FILE))
            .await
            .map_err(|e| IngestError::connectivity(fqdn, format!("{}: {}", SERVER_FILE, e)))?;
        let mut server: ExportedServer = serde_json::from_str(&server_text)
            .map_err(|e| IngestError::connectivity(fqdn, format!("{}: {}", SERVER_FILE, e)))?;
        if server.info.fqdn.is_empty() {
            server.info.fqdn = fqdn.to_string();
        }

        let rows = match tokio::fs::read_to_string(dir.join(HISTORY_FILE)).await {
            Ok(text) => parse_history(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(IngestError::connectivity(fqdn, e)),
        };
        debug!(server = %server.info.server, rows = rows.len(), "export loaded");

        Ok(Self { server, rows })
    }
}

fn parse_history(text: &str) -> Result<Vec<ExportedRow>> {
    let mut rows = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: ExportedRow = serde_json::from_str(line).map_err(|e| IngestError::ScanDecode {
            cursor: -1,
            reason: format!("{} line {}: {}", HISTORY_FILE, number + 1, e),
        })?;
        rows.push(row);
    }
    rows.sort_by_key(|r| r.instance_id);
    Ok(rows)
}

#[async_trait]
impl SourceConnector for ExportConnector {
    async fn server_info(&mut self) -> Result<ServerInfo> {
        Ok(self.server.info.clone())
    }

    async fn fetch_after(&mut self, cursor: i64, limit: usize) -> Result<Vec<RawEvent>> {
        let offset = Duration::minutes(self.server.utc_offset_minutes);
        let start = self.rows.partition_point(|r| r.instance_id <= cursor);
        self.rows[start..]
            .iter()
            .take(limit)
            .cloned()
            .map(|row| row.into_event(offset))
            .collect()
    }
}

/// Opens [`ExportConnector`]s under one export root
#[derive(Debug, Clone)]
pub struct ExportConnectorFactory {
    export_dir: PathBuf,
}

impl ExportConnectorFactory {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }
}

#[async_trait]
impl ConnectorFactory for ExportConnectorFactory {
    async fn connect(&self, source: &SourceConfig) -> Result<Box<dyn SourceConnector>> {
        let connector = ExportConnector::open(&self.export_dir, &source.fqdn).await?;
        Ok(Box::new(connector))
    }
}
