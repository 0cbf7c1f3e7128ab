//! Jobtrail Ingest - ship job history to log destinations

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jobtrail_common::logging::{init_logging, LogConfig, LogLevel};
use jobtrail_common::time;
use jobtrail_ingest::checkpoint::{CheckpointStore, FileCheckpointStore};
use jobtrail_ingest::config::{IngestSettings, SourceConfig};
use jobtrail_ingest::connector::export::ExportConnectorFactory;
use jobtrail_ingest::connector::ConnectorFactory;
use jobtrail_ingest::guard::ConcurrencyGuard;
use jobtrail_ingest::identity::{ServerInfo, SourceIdentity};
use jobtrail_ingest::metrics;
use jobtrail_ingest::pool::{PoolSummary, WorkerPool};
use jobtrail_ingest::run::Orchestrator;
use jobtrail_ingest::sink::ConfiguredSinks;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "jobtrail-ingest")]
#[command(author, version, about = "Ship job history to log destinations")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file
    #[arg(short, long, env = "JOBTRAIL_CONFIG", default_value = "jobtrail.toml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ship new history for every configured source
    Run {
        /// Only this source (matched on fqdn, case-insensitive)
        #[arg(long)]
        source: Option<String>,
    },

    /// Print the committed checkpoint of every configured source
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("jobtrail-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;

    init_logging(&log_config)?;

    let settings = IngestSettings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    match cli.command {
        Command::Run { source } => run(&settings, source.as_deref()).await,
        Command::Status => status(&settings).await,
    }
}

fn select_sources(settings: &IngestSettings, only: Option<&str>) -> Result<Vec<SourceConfig>> {
    let sources = settings.resolved_sources()?;
    let Some(only) = only else {
        return Ok(sources);
    };

    let selected: Vec<SourceConfig> = sources
        .into_iter()
        .filter(|s| s.fqdn.eq_ignore_ascii_case(only))
        .collect();
    if selected.is_empty() {
        bail!("source '{}' is not configured", only);
    }
    Ok(selected)
}

async fn run(settings: &IngestSettings, only: Option<&str>) -> Result<()> {
    let sources = select_sources(settings, only)?;
    metrics::global().reset();

    let guard = ConcurrencyGuard::with_lock_dir(settings.state_dir.join("locks"));
    let orchestrator = Orchestrator::new(
        Arc::new(ExportConnectorFactory::new(&settings.export_dir)),
        Arc::new(ConfiguredSinks::new(settings.sinks.clone())),
        Arc::new(FileCheckpointStore::new(&settings.state_dir)),
        Arc::new(guard),
    )
    .with_batch_size(settings.batch_size);

    let results = WorkerPool::new(orchestrator, settings.workers)
        .run_all(&sources)
        .await;

    for r in &results {
        let outcome = match (&r.error, r.skipped_duplicate) {
            (Some(e), _) => format!("failed: {}", e),
            (None, true) => "skipped: already running".to_string(),
            (None, false) => match r.committed_cursor {
                Some(cursor) => format!("committed cursor {}", cursor),
                None => "nothing new".to_string(),
            },
        };
        println!(
            "{:<32} {:<24} rows={:<8} {}",
            r.fqdn, r.instance, r.rows, outcome
        );
    }

    let snapshot = metrics::global().snapshot();
    debug!(metrics = %serde_json::to_string(&snapshot)?, "final counters");

    let summary = PoolSummary::from_results(&results);
    if summary.failed > 0 {
        bail!("{} of {} runs failed", summary.failed, summary.sources);
    }

    info!("Ingestion complete");
    Ok(())
}

async fn resolve_server(
    connectors: &dyn ConnectorFactory,
    source: &SourceConfig,
) -> jobtrail_ingest::Result<ServerInfo> {
    let mut connector = connectors.connect(source).await?;
    let info = connector.server_info().await;
    connector.close().await?;
    info
}

async fn status(settings: &IngestSettings) -> Result<()> {
    let sources = settings.resolved_sources()?;
    let connectors = ExportConnectorFactory::new(&settings.export_dir);
    let store = FileCheckpointStore::new(&settings.state_dir);

    for source in &sources {
        let server = match resolve_server(&connectors, source).await {
            Ok(server) => server,
            Err(e) => {
                println!("{:<32} unavailable: {}", source.fqdn, e);
                continue;
            },
        };

        let identity = SourceIdentity::agent_jobs(&server);
        let checkpoint = store
            .read_offset(&identity)
            .await
            .with_context(|| format!("Failed to read checkpoint for {}", identity))?;

        let committed = checkpoint
            .committed_at
            .map(|at| time::format_utc(&at))
            .unwrap_or_else(|| "never".to_string());
        let pending = checkpoint
            .pending_cursor
            .map(|c| format!(" pending={}", c))
            .unwrap_or_default();
        println!(
            "{:<32} {:<24} cursor={:<10} state={:?} committed={}{}",
            source.fqdn, server.server, checkpoint.cursor, checkpoint.state, committed, pending
        );
    }

    Ok(())
}
