//! Worker pool over several sources, and a full run over the on-disk export format
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{events, server, Faults, Harness, MemoryConnectorFactory, RecordingSinks};
use jobtrail_ingest::checkpoint::{CheckpointStore, FileCheckpointStore};
use jobtrail_ingest::config::{IngestSettings, SourceConfig};
use jobtrail_ingest::connector::export::ExportConnectorFactory;
use jobtrail_ingest::guard::{ConcurrencyGuard, GuardOutcome};
use jobtrail_ingest::identity::{ServerInfo, SourceIdentity};
use jobtrail_ingest::metrics::Metrics;
use jobtrail_ingest::pool::{PoolSummary, WorkerPool};
use jobtrail_ingest::run::Orchestrator;
use jobtrail_ingest::sink::ConfiguredSinks;
use std::sync::Arc;

fn named(server_name: &str) -> ServerInfo {
    ServerInfo {
        server: server_name.to_string(),
        computer: server_name.to_string(),
        ..server()
    }
}

#[tokio::test]
async fn test_one_failure_does_not_stop_siblings() {
    let h = Harness::new(
        MemoryConnectorFactory::default()
            .with_source("a.corp.local", named("SQLA"), events(3))
            .with_source("c.corp.local", named("SQLC"), events(2)),
        RecordingSinks::default().with_sink("main", Faults::default()),
    );
    let sources = vec![
        SourceConfig::new("a.corp.local"),
        SourceConfig::new("b.corp.local"),
        SourceConfig::new("c.corp.local"),
    ];

    let results = WorkerPool::new(h.orchestrator(), 2).run_all(&sources).await;

    let fqdns: Vec<&str> = results.iter().map(|r| r.fqdn.as_str()).collect();
    assert_eq!(fqdns, vec!["a.corp.local", "b.corp.local", "c.corp.local"]);
    assert!(results[0].is_success());
    assert!(!results[1].is_success());
    assert!(results[2].is_success());

    let summary = PoolSummary::from_results(&results);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.rows, 5);
    assert_eq!(h.metrics.snapshot().runs_failed, 1);
}

#[tokio::test]
async fn test_export_to_file_sink_end_to_end() {
    let export = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let server_dir = export.path().join("sql01.corp.local");
    std::fs::create_dir_all(&server_dir).unwrap();
    std::fs::write(
        server_dir.join("server.json"),
        r#"{"domain":"CORP","computer":"SQL01","server":"SQL01\\PROD","version":"2019","product_version":"15.0","utc_offset_minutes":60}"#,
    )
    .unwrap();
    let history: Vec<String> = (1..=4)
        .map(|id| {
            format!(
                r#"{{"instance_id":{},"job_id":"j","step_id":0,"job_name":"Nightly","message":"done","run_status":{},"run_date":20240301,"run_time":{}}}"#,
                id,
                id % 2,
                id * 10000
            )
        })
        .collect();
    std::fs::write(server_dir.join("history.jsonl"), history.join("\n")).unwrap();

    let settings = IngestSettings::from_toml_str(&format!(
        r#"
        state_dir = "{state}"
        export_dir = "{export}"

        [defaults]
        agent_jobs = "failed"

        [[sources]]
        fqdn = "sql01.corp.local"

        [[sinks]]
        type = "file"
        dir = "{out}"
        "#,
        state = state.path().display(),
        export = export.path().display(),
        out = out.path().display(),
    ))
    .unwrap();
    settings.validate().unwrap();

    let orchestrator = Orchestrator::new(
        Arc::new(ExportConnectorFactory::new(&settings.export_dir)),
        Arc::new(ConfiguredSinks::new(settings.sinks.clone())),
        Arc::new(FileCheckpointStore::new(&settings.state_dir)),
        Arc::new(ConcurrencyGuard::with_lock_dir(settings.state_dir.join("locks"))),
    )
    .with_metrics(Arc::new(Metrics::new()));

    let results = WorkerPool::new(orchestrator, settings.workers)
        .run_all(&settings.resolved_sources().unwrap())
        .await;
    assert!(results[0].is_success(), "{:?}", results[0].error);
    // status 0 rows are ids 2 and 4
    assert_eq!(results[0].rows, 2);
    assert_eq!(results[0].committed_cursor, Some(4));

    let files: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let content = std::fs::read_to_string(&files[0]).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["instance_id"], 2);
    // local 02:00 at UTC+1
    assert_eq!(lines[0]["timestamp"], "2024-03-01T01:00:00Z");
    assert_eq!(lines[0]["timestamp_local"], "2024-03-01T02:00:00");
    assert_eq!(lines[0]["mssql_server_name"], r"SQL01\PROD");

    let store = FileCheckpointStore::new(&settings.state_dir);
    let identity = SourceIdentity::agent_jobs(&named(r"SQL01\PROD"));
    assert_eq!(store.read_offset(&identity).await.unwrap().cursor, 4);

    // the run lock was released with the run
    let other = Arc::new(ConcurrencyGuard::with_lock_dir(settings.state_dir.join("locks")));
    assert!(matches!(
        other.acquire(&identity).await.unwrap(),
        GuardOutcome::Acquired(_)
    ));
}
