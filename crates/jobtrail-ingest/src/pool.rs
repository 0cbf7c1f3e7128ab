//! Bounded parallel runs over every configured source

use futures::stream::{self, StreamExt};
use tracing::{info, info_span, Instrument};

use crate::config::SourceConfig;
use crate::run::{Orchestrator, RunResult};

pub struct WorkerPool {
    orchestrator: Orchestrator,
    workers: usize,
}

/// Totals over one pool pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub sources: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows: u64,
}

impl PoolSummary {
    pub fn from_results(results: &[RunResult]) -> Self {
        let mut summary = Self {
            sources: results.len(),
            ..Default::default()
        };
        for r in results {
            summary.rows += r.rows;
            if r.error.is_some() {
                summary.failed += 1;
            } else if r.skipped_duplicate {
                summary.skipped += 1;
            } else {
                summary.succeeded += 1;
            }
        }
        summary
    }
}

impl WorkerPool {
    pub fn new(orchestrator: Orchestrator, workers: usize) -> Self {
        Self {
            orchestrator,
            workers: workers.max(1),
        }
    }

    /// Run every source once, at most `workers` at a time
    ///
    /// Results come back in the order of `sources`. One failed run never stops the
    /// others.
    pub async fn run_all(&self, sources: &[SourceConfig]) -> Vec<RunResult> {
        info!(
            sources = sources.len(),
            workers = self.workers,
            "starting runs"
        );

        let mut results: Vec<(usize, RunResult)> = stream::iter(sources.iter().enumerate())
            .map(|(index, source)| {
                let orchestrator = &self.orchestrator;
                async move { (index, orchestrator.run(source).await) }
                    .instrument(info_span!("worker", worker = index))
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        let results: Vec<RunResult> = results.into_iter().map(|(_, r)| r).collect();

        let summary = PoolSummary::from_results(&results);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            rows = summary.rows,
            "runs finished"
        );
        results
    }
}
