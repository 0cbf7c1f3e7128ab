//! Shared harness for pipeline integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use jobtrail_ingest::checkpoint::FileCheckpointStore;
use jobtrail_ingest::config::SourceConfig;
use jobtrail_ingest::connector::{ConnectorFactory, SourceConnector};
use jobtrail_ingest::error::{IngestError, Result};
use jobtrail_ingest::guard::ConcurrencyGuard;
use jobtrail_ingest::identity::ServerInfo;
use jobtrail_ingest::metrics::Metrics;
use jobtrail_ingest::run::Orchestrator;
use jobtrail_ingest::sink::{Sink, SinkError, SinkFactory, SinkResult};
use jobtrail_ingest::transform::{RawEvent, RecordKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const FQDN: &str = "sql01.corp.local";

pub fn server() -> ServerInfo {
    ServerInfo {
        fqdn: FQDN.to_string(),
        domain: "CORP".to_string(),
        computer: "SQL01".to_string(),
        server: r"SQL01\PROD".to_string(),
        version: "Microsoft SQL Server 2019".to_string(),
        product_version: "15.0.4335.1".to_string(),
    }
}

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Row `id` happens `id` hours after 2024-03-01T00:00:00Z
pub fn event(id: i64, status: i32) -> RawEvent {
    let local = base_time() + Duration::hours(id);
    RawEvent {
        instance_id: id,
        job_id: "6f1c2a".to_string(),
        step_id: if id % 2 == 0 { 1 } else { 0 },
        step_name: "Backup".to_string(),
        job_name: "Nightly".to_string(),
        message: format!("run {}", id),
        run_status: status,
        run_duration: 5,
        timestamp_local: local,
        timestamp_utc: format!("{}Z", local.format("%Y-%m-%dT%H:%M:%S")),
    }
}

/// Rows `1..=n`, all succeeded
pub fn events(n: i64) -> Vec<RawEvent> {
    (1..=n).map(|id| event(id, 1)).collect()
}

// ============================================================================
// Connector
// ============================================================================

pub struct MemoryConnector {
    server: ServerInfo,
    rows: Vec<RawEvent>,
    fetches: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    async fn server_info(&mut self) -> Result<ServerInfo> {
        Ok(self.server.clone())
    }

    async fn fetch_after(&mut self, cursor: i64, limit: usize) -> Result<Vec<RawEvent>> {
        self.fetches.lock().unwrap().push(cursor);
        Ok(self
            .rows
            .iter()
            .filter(|r| r.instance_id > cursor)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Serves fixed rows per fqdn; unknown fqdns are unreachable
#[derive(Default)]
pub struct MemoryConnectorFactory {
    sources: Mutex<HashMap<String, (ServerInfo, Vec<RawEvent>)>>,
    pub fetches: Arc<Mutex<Vec<i64>>>,
}

impl MemoryConnectorFactory {
    pub fn with_source(self, fqdn: &str, server: ServerInfo, rows: Vec<RawEvent>) -> Self {
        self.sources
            .lock()
            .unwrap()
            .insert(fqdn.to_string(), (server, rows));
        self
    }

    pub fn fetched_cursors(&self) -> Vec<i64> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectorFactory for MemoryConnectorFactory {
    async fn connect(&self, source: &SourceConfig) -> Result<Box<dyn SourceConnector>> {
        let sources = self.sources.lock().unwrap();
        let (server, rows) = sources
            .get(&source.fqdn)
            .cloned()
            .ok_or_else(|| IngestError::connectivity(&source.fqdn, "connection refused"))?;
        let mut rows = rows;
        rows.sort_by_key(|r| r.instance_id);
        Ok(Box::new(MemoryConnector {
            server,
            rows,
            fetches: Arc::clone(&self.fetches),
        }))
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Failure injection for a [`RecordingSink`]
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail the nth write (1-based)
    pub fail_write_at: Option<usize>,
    pub fail_flush: bool,
    pub fail_clean: bool,
}

/// Everything one recording sink saw, across runs
#[derive(Debug, Default)]
pub struct SinkLog {
    pub ids: Vec<String>,
    pub lines: Vec<(RecordKind, String)>,
    pub ops: Vec<String>,
}

pub struct RecordingSink {
    name: String,
    faults: Faults,
    writes: usize,
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    fn op(&self, op: &str) {
        self.log.lock().unwrap().ops.push(op.to_string());
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self, id: &str) -> SinkResult<()> {
        self.op("open");
        self.log.lock().unwrap().ids.push(id.to_string());
        Ok(())
    }

    async fn write(&mut self, kind: RecordKind, line: &str) -> SinkResult<u64> {
        self.writes += 1;
        if self.faults.fail_write_at == Some(self.writes) {
            self.op("write-failed");
            return Err(SinkError::Rejected("queue full".to_string()));
        }
        self.op("write");
        self.log
            .lock()
            .unwrap()
            .lines
            .push((kind, line.to_string()));
        Ok(line.len() as u64)
    }

    async fn flush(&mut self) -> SinkResult<()> {
        self.op("flush");
        if self.faults.fail_flush {
            return Err(SinkError::Rejected("flush timed out".to_string()));
        }
        Ok(())
    }

    async fn clean(&mut self) -> SinkResult<()> {
        self.op("clean");
        if self.faults.fail_clean {
            return Err(SinkError::Rejected("clean refused".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> SinkResult<()> {
        self.op("close");
        Ok(())
    }
}

/// Builds one [`RecordingSink`] per configured name for every run
#[derive(Default)]
pub struct RecordingSinks {
    planned: Vec<(String, Faults)>,
    logs: HashMap<String, Arc<Mutex<SinkLog>>>,
}

impl RecordingSinks {
    pub fn with_sink(mut self, name: &str, faults: Faults) -> Self {
        self.planned.push((name.to_string(), faults));
        self.logs
            .insert(name.to_string(), Arc::new(Mutex::new(SinkLog::default())));
        self
    }

    pub fn log(&self, name: &str) -> Arc<Mutex<SinkLog>> {
        Arc::clone(&self.logs[name])
    }

    /// `instance_id` of every line written to `name`
    pub fn delivered_ids(&self, name: &str) -> Vec<i64> {
        self.logs[name]
            .lock()
            .unwrap()
            .lines
            .iter()
            .map(|(_, line)| {
                let v: serde_json::Value = serde_json::from_str(line).unwrap();
                v["instance_id"].as_i64().unwrap()
            })
            .collect()
    }

    pub fn lines(&self, name: &str) -> Vec<String> {
        self.logs[name]
            .lock()
            .unwrap()
            .lines
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn ops(&self, name: &str) -> Vec<String> {
        self.logs[name].lock().unwrap().ops.clone()
    }
}

impl SinkFactory for RecordingSinks {
    fn build(&self) -> Vec<Box<dyn Sink>> {
        self.planned
            .iter()
            .map(|(name, faults)| -> Box<dyn Sink> {
                Box::new(RecordingSink {
                    name: name.clone(),
                    faults: faults.clone(),
                    writes: 0,
                    log: Arc::clone(&self.logs[name]),
                })
            })
            .collect()
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub connectors: Arc<MemoryConnectorFactory>,
    pub sinks: Arc<RecordingSinks>,
    pub store: Arc<FileCheckpointStore>,
    pub guard: Arc<ConcurrencyGuard>,
    pub metrics: Arc<Metrics>,
    pub state: tempfile::TempDir,
}

impl Harness {
    pub fn new(connectors: MemoryConnectorFactory, sinks: RecordingSinks) -> Self {
        let state = tempfile::tempdir().unwrap();
        Self {
            connectors: Arc::new(connectors),
            sinks: Arc::new(sinks),
            store: Arc::new(FileCheckpointStore::new(state.path())),
            guard: Arc::new(ConcurrencyGuard::in_memory()),
            metrics: Arc::new(Metrics::new()),
            state,
        }
    }

    /// One source serving `rows`, one healthy sink named `main`
    pub fn single(rows: Vec<RawEvent>) -> Self {
        Self::new(
            MemoryConnectorFactory::default().with_source(FQDN, server(), rows),
            RecordingSinks::default().with_sink("main", Faults::default()),
        )
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.connectors.clone(),
            self.sinks.clone(),
            self.store.clone(),
            Arc::clone(&self.guard),
        )
        .with_metrics(Arc::clone(&self.metrics))
    }
}
