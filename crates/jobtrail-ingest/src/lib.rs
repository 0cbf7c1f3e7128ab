//! Jobtrail Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental, checkpointed shipping of job history from monitored servers to log
//! destinations.
//!
//! # Pipeline
//!
//! - **Connector**: resolves the server and pages history rows by cursor
//! - **Transform**: classifies each row and shapes the canonical record
//! - **Fan-out**: writes every delivered record to every sink
//! - **Checkpoint**: advances the resume cursor only after all sinks flushed
//! - **Guard**: keeps two runs off the same source
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jobtrail_ingest::checkpoint::FileCheckpointStore;
//! use jobtrail_ingest::config::IngestSettings;
//! use jobtrail_ingest::connector::export::ExportConnectorFactory;
//! use jobtrail_ingest::guard::ConcurrencyGuard;
//! use jobtrail_ingest::pool::WorkerPool;
//! use jobtrail_ingest::run::Orchestrator;
//! use jobtrail_ingest::sink::ConfiguredSinks;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = IngestSettings::load("jobtrail.toml")?;
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(ExportConnectorFactory::new(&settings.export_dir)),
//!         Arc::new(ConfiguredSinks::new(settings.sinks.clone())),
//!         Arc::new(FileCheckpointStore::new(&settings.state_dir)),
//!         Arc::new(ConcurrencyGuard::in_memory()),
//!     );
//!     let results = WorkerPool::new(orchestrator, settings.workers)
//!         .run_all(&settings.resolved_sources()?)
//!         .await;
//!     println!("{} runs", results.len());
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod connector;
pub mod error;
pub mod fanout;
pub mod field_ops;
pub mod guard;
pub mod identity;
pub mod metrics;
pub mod pool;
pub mod record;
pub mod run;
pub mod sink;
pub mod transform;

pub use error::{IngestError, Result};
