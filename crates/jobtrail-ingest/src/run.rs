//! One shipping run for one source
//!
//! ```text
//! connect → resolve server → guard → read checkpoint → scan → finish sinks → commit
//! ```
//!
//! The run owns its connector, sinks and permit and releases all three however it
//! ends. A run that finds its source busy returns immediately with
//! `skipped_duplicate` set and no side effects.

use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::{SourceConfig, DEFAULT_BATCH_SIZE};
use crate::connector::{ConnectorFactory, SourceConnector};
use crate::error::{IngestError, Result};
use crate::fanout::SinkFanout;
use crate::guard::{ConcurrencyGuard, GuardOutcome};
use crate::identity::{path_safe, SourceIdentity, AGENT_JOBS_SESSION};
use crate::metrics::{self, Metrics};
use crate::sink::SinkFactory;
use crate::transform::{Outcome, Transformer};

/// What a run did; never persisted
#[derive(Debug)]
pub struct RunResult {
    pub session: String,
    /// Source as configured
    pub fqdn: String,
    /// Server display name, empty until resolved
    pub instance: String,
    /// Records delivered to every sink
    pub rows: u64,
    /// Rows read from the source, delivered or not
    pub scanned: u64,
    pub committed_cursor: Option<i64>,
    pub skipped_duplicate: bool,
    pub error: Option<IngestError>,
}

impl RunResult {
    fn new(source: &SourceConfig) -> Self {
        Self {
            session: AGENT_JOBS_SESSION.to_string(),
            fqdn: source.fqdn.clone(),
            instance: String::new(),
            rows: 0,
            scanned: 0,
            committed_cursor: None,
            skipped_duplicate: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a run needs besides its source configuration
///
/// Shared by every worker of the pool.
#[derive(Clone)]
pub struct Orchestrator {
    connectors: Arc<dyn ConnectorFactory>,
    sinks: Arc<dyn SinkFactory>,
    checkpoints: Arc<dyn CheckpointStore>,
    guard: Arc<ConcurrencyGuard>,
    metrics: Arc<Metrics>,
    batch_size: usize,
}

impl Orchestrator {
    pub fn new(
        connectors: Arc<dyn ConnectorFactory>,
        sinks: Arc<dyn SinkFactory>,
        checkpoints: Arc<dyn CheckpointStore>,
        guard: Arc<ConcurrencyGuard>,
    ) -> Self {
        Self {
            connectors,
            sinks,
            checkpoints,
            guard,
            metrics: metrics::global(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Ship everything new for `source`
    pub async fn run(&self, source: &SourceConfig) -> RunResult {
        let span = info_span!("run", server = %source.fqdn, session = AGENT_JOBS_SESSION);

        async {
            let mut result = RunResult::new(source);

            if let Err(e) = self.execute(source, &mut result).await {
                error!(error = %e, rows = result.rows, "run failed");
                result.error = Some(e);
            }

            if !result.skipped_duplicate {
                self.metrics.record_run(result.error.is_some());
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, source: &SourceConfig, result: &mut RunResult) -> Result<()> {
        let mut connector = self.connectors.connect(source).await?;
        let outcome = self.resolve_and_ship(source, connector.as_mut(), result).await;

        if let Err(e) = connector.close().await {
            warn!(error = %e, "connector close failed");
        }
        outcome
    }

    async fn resolve_and_ship(
        &self,
        source: &SourceConfig,
        connector: &mut dyn SourceConnector,
        result: &mut RunResult,
    ) -> Result<()> {
        let server = connector.server_info().await?;
        result.instance = server.server.clone();
        let identity = SourceIdentity::agent_jobs(&server);

        if let Some(ref prefix) = source.prefix {
            self.checkpoints.migrate_legacy(prefix, &identity).await?;
        }

        let permit = match self.guard.acquire(&identity).await? {
            GuardOutcome::Acquired(permit) => permit,
            GuardOutcome::Conflict { holder } => {
                info!(source = %identity, holder = %holder, "source busy, skipping run");
                result.skipped_duplicate = true;
                self.metrics.record_skipped_run();
                return Ok(());
            },
        };

        let checkpoint = self.checkpoints.read_offset(&identity).await?;
        debug!(cursor = checkpoint.cursor, "resuming");

        let transformer = Transformer::new(source, server.clone())?;
        let batch_key = permit.run_id().to_string();

        let mut fanout = SinkFanout::new(self.sinks.build());
        let shipped = self
            .ship(
                Scan {
                    source,
                    identity: &identity,
                    batch_key: &batch_key,
                    sink_id: path_safe(&server.server),
                    resume_from: checkpoint.cursor,
                },
                connector,
                &transformer,
                &mut fanout,
                result,
            )
            .await;
        fanout.close_all().await;
        drop(permit);

        shipped
    }

    async fn ship(
        &self,
        scan: Scan<'_>,
        connector: &mut dyn SourceConnector,
        transformer: &Transformer,
        fanout: &mut SinkFanout,
        result: &mut RunResult,
    ) -> Result<()> {
        fanout.open_all(&scan.sink_id).await?;

        let highest = match self.scan(&scan, connector, transformer, fanout, result).await {
            Ok(highest) => highest,
            Err(e) => {
                if result.scanned > 0 {
                    self.mark_failed(&scan).await;
                }
                return Err(e);
            },
        };

        let Some(highest) = highest else {
            debug!("no new rows");
            return Ok(());
        };

        if let Err(e) = fanout.finish().await {
            self.mark_failed(&scan).await;
            return Err(e);
        }

        self.checkpoints
            .commit(scan.identity, scan.batch_key, highest, CheckpointState::Success)
            .await?;
        result.committed_cursor = Some(highest);
        info!(
            rows = result.rows,
            scanned = result.scanned,
            cursor = highest,
            "checkpoint committed"
        );
        Ok(())
    }

    /// Returns the highest cursor scanned, `None` when nothing was scanned
    async fn scan(
        &self,
        scan: &Scan<'_>,
        connector: &mut dyn SourceConnector,
        transformer: &Transformer,
        fanout: &mut SinkFanout,
        result: &mut RunResult,
    ) -> Result<Option<i64>> {
        let row_cap = scan.source.row_cap;
        let counter_key = scan.identity.counter_key();
        let mut cursor = scan.resume_from;
        let mut highest = None;
        let mut before_window_logged = false;

        'pages: loop {
            if row_cap > 0 && result.rows >= row_cap {
                break;
            }

            let page = connector.fetch_after(cursor, self.batch_size).await?;
            if page.is_empty() {
                break;
            }

            for event in page {
                if row_cap > 0 && result.rows >= row_cap {
                    debug!(row_cap, "row cap reached");
                    break 'pages;
                }
                if event.instance_id <= cursor {
                    return Err(IngestError::ScanDecode {
                        cursor: event.instance_id,
                        reason: format!("row out of order after cursor {}", cursor),
                    });
                }

                self.metrics.record_read();
                match transformer.process(&event)? {
                    Outcome::StopBoundary => {
                        info!(
                            cursor = event.instance_id,
                            timestamp = %event.timestamp_utc,
                            "stop boundary reached"
                        );
                        break 'pages;
                    },
                    Outcome::BeforeWindow => {
                        if !before_window_logged {
                            info!(
                                cursor = event.instance_id,
                                timestamp = %event.timestamp_utc,
                                "skipping rows before start_at"
                            );
                            before_window_logged = true;
                        }
                    },
                    Outcome::Suppressed { status } => {
                        self.metrics.record_suppressed();
                        debug!(cursor = event.instance_id, status = status.label(), "row suppressed");
                    },
                    Outcome::Deliver { kind, record } => {
                        let acked = fanout.write(kind, &record).await?;
                        result.rows += 1;
                        self.metrics
                            .record_delivered(kind.as_str(), &counter_key, acked);
                    },
                }

                self.checkpoints
                    .save(
                        scan.identity,
                        scan.batch_key,
                        event.instance_id,
                        CheckpointState::Success,
                    )
                    .await?;
                cursor = event.instance_id;
                highest = Some(event.instance_id);
                result.scanned += 1;
            }
        }

        Ok(highest)
    }

    /// Record that progress after the last commit did not make it
    async fn mark_failed(&self, scan: &Scan<'_>) {
        let checkpoint = match self.checkpoints.read_offset(scan.identity).await {
            Ok(cp) => cp,
            Err(e) => {
                warn!(error = %e, "cannot read checkpoint to mark failure");
                return;
            },
        };
        let cursor = checkpoint.pending_cursor.unwrap_or(checkpoint.cursor);
        if let Err(e) = self
            .checkpoints
            .save(scan.identity, scan.batch_key, cursor, CheckpointState::Failure)
            .await
        {
            warn!(error = %e, "cannot mark checkpoint as failed");
        }
    }
}

/// Per-run scan parameters
struct Scan<'a> {
    source: &'a SourceConfig,
    identity: &'a SourceIdentity,
    batch_key: &'a str,
    sink_id: String,
    resume_from: i64,
}
