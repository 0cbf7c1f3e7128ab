//! Shipper configuration
//!
//! Settings come from a TOML file, then `JOBTRAIL_*` environment variables override the
//! process-level keys. Each `[[sources]]` entry is merged over `[defaults]` and resolved
//! into a [`SourceConfig`], the read-only view the pipeline works from.
//!
//! ```toml
//! state_dir = "./state"
//! workers = 4
//!
//! [defaults]
//! agent_jobs = "failed"
//! adds = ["env:prod"]
//!
//! [[sources]]
//! fqdn = "sql01.corp.local"
//! rows = 5000
//!
//! [[sinks]]
//! type = "file"
//! dir = "./out"
//! ```

use chrono::{DateTime, Utc};
use jobtrail_common::time;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::field_ops::FieldOps;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Field the event time is written to when nothing else is configured
pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";

/// Directory holding checkpoint and lock files
pub const DEFAULT_STATE_DIR: &str = "./state";

/// Directory the export connector reads from
pub const DEFAULT_EXPORT_DIR: &str = "./export";

/// Sources processed concurrently
pub const DEFAULT_WORKERS: usize = 4;

/// Rows requested from the connector per round trip
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Which rows reach the sinks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    #[default]
    #[serde(rename = "all")]
    All,
    /// Only failed, retried and cancelled runs
    #[serde(rename = "failed", alias = "failed_only")]
    FailedOnly,
}

/// Resolved configuration for one logical source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    /// Server to connect to
    pub fqdn: String,
    /// Prefix of checkpoint files written by older releases
    pub prefix: Option<String>,
    /// Maximum records delivered per run, 0 = unlimited
    pub row_cap: u64,
    pub start_at: DateTime<Utc>,
    pub stop_at: DateTime<Utc>,
    pub delivery_mode: DeliveryMode,
    /// Nest the record under this field; `None` keeps it flat
    pub payload_field: Option<String>,
    pub timestamp_field: String,
    pub adds: Vec<String>,
    pub copies: Vec<String>,
    pub moves: Vec<String>,
    /// Value for `server_instance_name` when the server's own name is not wanted
    pub server_instance_name: Option<String>,
}

impl SourceConfig {
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            prefix: None,
            row_cap: 0,
            start_at: DateTime::<Utc>::UNIX_EPOCH,
            stop_at: time::far_future(),
            delivery_mode: DeliveryMode::All,
            payload_field: None,
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            adds: Vec::new(),
            copies: Vec::new(),
            moves: Vec::new(),
            server_instance_name: None,
        }
    }

    pub fn with_row_cap(mut self, rows: u64) -> Self {
        self.row_cap = rows;
        self
    }

    pub fn with_window(mut self, start_at: DateTime<Utc>, stop_at: DateTime<Utc>) -> Self {
        self.start_at = start_at;
        self.stop_at = stop_at;
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_payload_field(mut self, field: impl Into<String>) -> Self {
        self.payload_field = Some(field.into());
        self
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_field_ops(
        mut self,
        adds: Vec<String>,
        copies: Vec<String>,
        moves: Vec<String>,
    ) -> Self {
        self.adds = adds;
        self.copies = copies;
        self.moves = moves;
        self
    }

    /// Compile the configured add/copy/move lists
    pub fn field_ops(&self) -> Result<FieldOps> {
        FieldOps::parse(&self.adds, &self.copies, &self.moves)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fqdn.trim().is_empty() {
            return Err(IngestError::config("source fqdn cannot be empty"));
        }
        if self.start_at > self.stop_at {
            return Err(IngestError::config(format!(
                "source '{}': start_at ({}) is after stop_at ({})",
                self.fqdn,
                time::format_utc(&self.start_at),
                time::format_utc(&self.stop_at)
            )));
        }
        if self.timestamp_field.trim().is_empty() {
            return Err(IngestError::config(format!(
                "source '{}': timestamp_field_name cannot be empty",
                self.fqdn
            )));
        }
        if self.payload_field.as_deref() == Some(self.timestamp_field.as_str()) {
            return Err(IngestError::config(format!(
                "source '{}': payload_field_name and timestamp_field_name are both '{}'",
                self.fqdn, self.timestamp_field
            )));
        }
        self.field_ops()?;
        Ok(())
    }
}

/// One `[[sources]]` entry, or the `[defaults]` table, as written in the file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    pub fqdn: Option<String>,
    pub prefix: Option<String>,
    pub rows: Option<u64>,
    pub start_at: Option<String>,
    pub stop_at: Option<String>,
    pub agent_jobs: Option<DeliveryMode>,
    pub payload_field_name: Option<String>,
    pub timestamp_field_name: Option<String>,
    #[serde(default)]
    pub adds: Vec<String>,
    #[serde(default)]
    pub copies: Vec<String>,
    #[serde(default)]
    pub moves: Vec<String>,
    pub server_instance_name: Option<String>,
}

impl SourceSettings {
    /// Overlay this entry on `defaults`; field operation lists are concatenated
    pub fn merged_over(&self, defaults: &SourceSettings) -> SourceSettings {
        fn pick<T: Clone>(own: &Option<T>, fallback: &Option<T>) -> Option<T> {
            own.clone().or_else(|| fallback.clone())
        }
        fn concat(first: &[String], second: &[String]) -> Vec<String> {
            first.iter().chain(second).cloned().collect()
        }

        SourceSettings {
            fqdn: pick(&self.fqdn, &defaults.fqdn),
            prefix: pick(&self.prefix, &defaults.prefix),
            rows: pick(&self.rows, &defaults.rows),
            start_at: pick(&self.start_at, &defaults.start_at),
            stop_at: pick(&self.stop_at, &defaults.stop_at),
            agent_jobs: pick(&self.agent_jobs, &defaults.agent_jobs),
            payload_field_name: pick(&self.payload_field_name, &defaults.payload_field_name),
            timestamp_field_name: pick(
                &self.timestamp_field_name,
                &defaults.timestamp_field_name,
            ),
            adds: concat(&defaults.adds, &self.adds),
            copies: concat(&defaults.copies, &self.copies),
            moves: concat(&defaults.moves, &self.moves),
            server_instance_name: pick(
                &self.server_instance_name,
                &defaults.server_instance_name,
            ),
        }
    }

    pub fn resolve(&self) -> Result<SourceConfig> {
        let fqdn = self
            .fqdn
            .clone()
            .ok_or_else(|| IngestError::config("every source needs an fqdn"))?;

        let mut source = SourceConfig::new(fqdn);
        source.prefix = self.prefix.clone().filter(|p| !p.is_empty());
        source.row_cap = self.rows.unwrap_or(0);
        if let Some(ref start) = self.start_at {
            source.start_at = time::parse_utc(start)?;
        }
        if let Some(ref stop) = self.stop_at {
            source.stop_at = time::parse_utc(stop)?;
        }
        source.delivery_mode = self.agent_jobs.unwrap_or_default();
        source.payload_field = self.payload_field_name.clone().filter(|p| !p.is_empty());
        if let Some(ref field) = self.timestamp_field_name {
            source.timestamp_field = field.clone();
        }
        source.adds = self.adds.clone();
        source.copies = self.copies.clone();
        source.moves = self.moves.clone();
        source.server_instance_name = self.server_instance_name.clone();

        source.validate()?;
        Ok(source)
    }
}

/// A configured delivery destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkSettings {
    /// JSON lines, one file per server and hour
    File {
        dir: PathBuf,
        /// Files older than this are removed by `clean`
        #[serde(default)]
        retain_hours: Option<u64>,
    },
    Stdout,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(DEFAULT_EXPORT_DIR)
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Top-level settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestSettings {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub defaults: SourceSettings,
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
    #[serde(default)]
    pub sinks: Vec<SinkSettings>,
}

impl IngestSettings {
    /// Load settings from a TOML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("cannot read '{}': {}", path.display(), e))
        })?;

        let mut settings = Self::from_toml_str(&content)?;
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| IngestError::config(e.to_string()))
    }

    /// Override process-level keys from `JOBTRAIL_STATE_DIR`, `JOBTRAIL_EXPORT_DIR`
    /// and `JOBTRAIL_WORKERS`
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("JOBTRAIL_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("JOBTRAIL_EXPORT_DIR") {
            self.export_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = std::env::var("JOBTRAIL_WORKERS") {
            self.workers = workers.parse().map_err(|_| {
                IngestError::config(format!("JOBTRAIL_WORKERS '{}' is not a number", workers))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(IngestError::config("workers must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(IngestError::config("batch_size must be greater than 0"));
        }
        if self.sinks.is_empty() {
            return Err(IngestError::config("at least one sink must be configured"));
        }
        self.resolved_sources()?;
        Ok(())
    }

    /// Every source merged over the defaults, in file order
    pub fn resolved_sources(&self) -> Result<Vec<SourceConfig>> {
        if self.sources.is_empty() {
            return Err(IngestError::config("no sources configured"));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.sources.len());
        for entry in &self.sources {
            let source = entry.merged_over(&self.defaults).resolve()?;
            if !seen.insert(source.fqdn.to_lowercase()) {
                return Err(IngestError::config(format!(
                    "source '{}' is configured more than once",
                    source.fqdn
                )));
            }
            resolved.push(source);
        }
        Ok(resolved)
    }
}
