//! Raw row to canonical record
//!
//! [`Transformer::process`] decides what happens to one row:
//!
//! 1. rows older than `start_at` are skipped, rows newer than `stop_at` end the scan
//! 2. the run status is classified and the description synthesized
//! 3. the delivery mode decides whether the record reaches the sinks
//! 4. the record is projected (payload nesting, timestamp field rename)
//! 5. the configured field operations reshape the tree
//!
//! Only a malformed UTC timestamp can fail; every other step is total.

use chrono::{DateTime, NaiveDateTime, Utc};
use jobtrail_common::time;
use serde::{Deserialize, Serialize};

use crate::classify::RunStatus;
use crate::config::{DeliveryMode, SourceConfig, DEFAULT_TIMESTAMP_FIELD};
use crate::error::{IngestError, Result};
use crate::field_ops::FieldOps;
use crate::identity::ServerInfo;
use crate::record::{Record, Value};

/// Job-level vs step-level history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    AgentJob,
    AgentJobStep,
}

impl RecordKind {
    /// Step 0 is the job outcome row; every other step id is a step row
    pub fn from_step_id(step_id: i32) -> Self {
        if step_id == 0 {
            RecordKind::AgentJob
        } else {
            RecordKind::AgentJobStep
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::AgentJob => "agent_job",
            RecordKind::AgentJobStep => "agent_job_step",
        }
    }
}

/// One job history row as read from the source
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Ordering key and cursor value
    pub instance_id: i64,
    pub job_id: String,
    pub step_id: i32,
    pub step_name: String,
    pub job_name: String,
    pub message: String,
    pub run_status: i32,
    pub run_duration: i32,
    pub timestamp_local: NaiveDateTime,
    /// RFC 3339 text as produced by the server; decoded during transformation
    pub timestamp_utc: String,
}

impl RawEvent {
    pub fn kind(&self) -> RecordKind {
        RecordKind::from_step_id(self.step_id)
    }

    /// Value of `xe_description`
    pub fn description(&self) -> String {
        match self.kind() {
            RecordKind::AgentJob => format!("{}: {}", self.job_name, self.message),
            RecordKind::AgentJobStep => format!(
                "{}: [{}] {}: {}",
                self.job_name, self.step_id, self.step_name, self.message
            ),
        }
    }
}

/// What the pipeline should do with a row
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Hand the record to every sink
    Deliver { kind: RecordKind, record: Record },
    /// Classified but excluded by the delivery mode
    Suppressed { status: RunStatus },
    /// Older than the window start
    BeforeWindow,
    /// Newer than the window stop; nothing after this row is processed
    StopBoundary,
}

/// Per-run transformation state built from the source configuration
#[derive(Debug, Clone)]
pub struct Transformer {
    start_at: DateTime<Utc>,
    stop_at: DateTime<Utc>,
    mode: DeliveryMode,
    payload_field: Option<String>,
    timestamp_field: String,
    instance_name: Option<String>,
    ops: FieldOps,
    server: ServerInfo,
}

impl Transformer {
    pub fn new(source: &SourceConfig, server: ServerInfo) -> Result<Self> {
        source.validate()?;
        Ok(Self {
            start_at: source.start_at,
            stop_at: source.stop_at,
            mode: source.delivery_mode,
            payload_field: source.payload_field.clone().filter(|f| !f.is_empty()),
            timestamp_field: source.timestamp_field.clone(),
            instance_name: source.server_instance_name.clone(),
            ops: source.field_ops()?,
            server,
        })
    }

    pub fn process(&self, event: &RawEvent) -> Result<Outcome> {
        let utc = time::parse_utc(&event.timestamp_utc).map_err(|e| IngestError::ScanDecode {
            cursor: event.instance_id,
            reason: e.to_string(),
        })?;

        if utc < self.start_at {
            return Ok(Outcome::BeforeWindow);
        }
        if utc > self.stop_at {
            return Ok(Outcome::StopBoundary);
        }

        let status = RunStatus::from_code(event.run_status);
        if !self.delivers(status) {
            return Ok(Outcome::Suppressed { status });
        }

        let mut record = self.project(self.base_record(event, utc, status));
        self.ops.apply(&mut record);

        Ok(Outcome::Deliver {
            kind: event.kind(),
            record,
        })
    }

    fn delivers(&self, status: RunStatus) -> bool {
        match self.mode {
            DeliveryMode::All => true,
            DeliveryMode::FailedOnly => status.is_failure(),
        }
    }

    /// The flat canonical record before projection
    pub fn base_record(&self, event: &RawEvent, utc: DateTime<Utc>, status: RunStatus) -> Record {
        let severity = status.severity();
        let mut base = Record::new();

        base.set("name", event.kind().as_str());
        base.set("instance_id", event.instance_id);
        base.set("job_id", event.job_id.as_str());
        base.set("step_id", event.step_id);
        base.set("step_name", event.step_name.as_str());
        base.set("job_name", event.job_name.as_str());
        base.set("message", event.message.as_str());
        base.set("run_status", event.run_status);
        base.set("run_status_text", status.label());
        base.set("xe_severity_value", severity.value());
        base.set("xe_severity_keyword", severity.keyword());
        base.set("run_duration", event.run_duration);
        base.set("timestamp", utc);
        base.set("timestamp_local", event.timestamp_local);
        base.set("timestamp_utc_calculated", utc);

        base.set("mssql_domain", self.server.domain.as_str());
        base.set("mssql_computer", self.server.computer.as_str());
        base.set("mssql_server_name", self.server.server.as_str());
        base.set("mssql_version", self.server.version.as_str());
        base.set("mssql_product_version", self.server.product_version.as_str());

        if let Some(ref name) = self.instance_name {
            base.set("server_instance_name", name.as_str());
        }
        base.set_if_empty("server_instance_name", self.server.server.as_str());

        let description = event.description();
        if !description.is_empty() {
            base.set("xe_description", description);
        }

        base
    }

    /// Nest under the payload field or rename the root timestamp
    pub fn project(&self, base: Record) -> Record {
        match self.payload_field {
            Some(ref payload) => {
                let ts = base.get(DEFAULT_TIMESTAMP_FIELD).cloned();
                let mut out = Record::new();
                out.set(payload.as_str(), Value::Record(base));
                if let Some(ts) = ts {
                    out.set(self.timestamp_field.as_str(), ts);
                }
                out
            },
            None => {
                let mut out = base;
                if self.timestamp_field != DEFAULT_TIMESTAMP_FIELD {
                    if let Some(ts) = out.remove(DEFAULT_TIMESTAMP_FIELD) {
                        out.set(self.timestamp_field.as_str(), ts);
                    }
                }
                out
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn server() -> ServerInfo {
        ServerInfo {
            fqdn: "sql01.corp.local".to_string(),
            domain: "CORP".to_string(),
            computer: "SQL01".to_string(),
            server: r"SQL01\PROD".to_string(),
            version: "Microsoft SQL Server 2019".to_string(),
            product_version: "15.0.4335.1".to_string(),
        }
    }

    fn event(step_id: i32, status: i32, utc: &str) -> RawEvent {
        RawEvent {
            instance_id: 42,
            job_id: "6f1c".to_string(),
            step_id,
            step_name: if step_id == 0 {
                "(Job outcome)".to_string()
            } else {
                "Backup databases".to_string()
            },
            job_name: "Nightly".to_string(),
            message: "The job failed.".to_string(),
            run_status: status,
            run_duration: 17,
            timestamp_local: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(2, 0, 0)
                .unwrap(),
            timestamp_utc: utc.to_string(),
        }
    }

    fn delivered(outcome: Outcome) -> Record {
        match outcome {
            Outcome::Deliver { record, .. } => record,
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_job_record_fields() {
        let t = Transformer::new(&SourceConfig::new("sql01"), server()).unwrap();
        let record = delivered(t.process(&event(0, 0, "2024-03-01T08:00:00Z")).unwrap());

        assert_eq!(record.get("name"), Some(&Value::from("agent_job")));
        assert_eq!(record.get("run_status_text"), Some(&Value::from("failed")));
        assert_eq!(record.get("xe_severity_value"), Some(&Value::Int(3)));
        assert_eq!(record.get("xe_severity_keyword"), Some(&Value::from("error")));
        assert_eq!(
            record.get("xe_description"),
            Some(&Value::from("Nightly: The job failed."))
        );
        assert_eq!(
            record.get("server_instance_name"),
            Some(&Value::from(r"SQL01\PROD"))
        );
        assert_eq!(
            record.get("timestamp"),
            Some(&Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_step_description() {
        let e = event(3, 1, "2024-03-01T08:00:00Z");
        assert_eq!(
            e.description(),
            "Nightly: [3] Backup databases: The job failed."
        );
        assert_eq!(e.kind(), RecordKind::AgentJobStep);
    }

    #[test]
    fn test_window_bounds() {
        let source = SourceConfig::new("sql01").with_window(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        );
        let t = Transformer::new(&source, server()).unwrap();

        assert_eq!(
            t.process(&event(0, 1, "2024-02-29T23:59:59Z")).unwrap(),
            Outcome::BeforeWindow
        );
        assert_eq!(
            t.process(&event(0, 1, "2024-03-02T00:00:01Z")).unwrap(),
            Outcome::StopBoundary
        );
        // bounds are inclusive
        assert!(matches!(
            t.process(&event(0, 1, "2024-03-02T00:00:00Z")).unwrap(),
            Outcome::Deliver { .. }
        ));
    }

    #[test]
    fn test_failed_only_suppresses_success() {
        let source = SourceConfig::new("sql01").with_delivery_mode(DeliveryMode::FailedOnly);
        let t = Transformer::new(&source, server()).unwrap();

        let shipped: Vec<i32> = [0, 1, 2, 3]
            .into_iter()
            .filter(|s| {
                matches!(
                    t.process(&event(0, *s, "2024-03-01T08:00:00Z")).unwrap(),
                    Outcome::Deliver { .. }
                )
            })
            .collect();
        assert_eq!(shipped, vec![0, 2, 3]);
    }

    #[test]
    fn test_payload_projection_hoists_timestamp() {
        let source = SourceConfig::new("sql01")
            .with_payload_field("event")
            .with_timestamp_field("ts");
        let t = Transformer::new(&source, server()).unwrap();

        let ts = Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        let mut base = Record::new();
        base.set("timestamp", ts.clone());
        base.set("message", "M");

        let out = t.project(base.clone());
        assert_eq!(out.len(), 2);
        assert_eq!(out.get("event"), Some(&Value::Record(base)));
        assert_eq!(out.get("ts"), Some(&ts));
        assert!(!out.contains_key("timestamp"));
    }

    #[test]
    fn test_payload_and_timestamp_must_differ() {
        let source = SourceConfig::new("sql01")
            .with_payload_field("ts")
            .with_timestamp_field("ts");
        let err = Transformer::new(&source, server()).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_root_timestamp_rename() {
        let source = SourceConfig::new("sql01").with_timestamp_field("@timestamp");
        let t = Transformer::new(&source, server()).unwrap();
        let record = delivered(t.process(&event(0, 1, "2024-03-01T08:00:00Z")).unwrap());
        assert!(record.contains_key("@timestamp"));
        assert!(!record.contains_key("timestamp"));
        assert!(record.contains_key("timestamp_utc_calculated"));
    }

    #[test]
    fn test_field_ops_run_after_projection() {
        let source = SourceConfig::new("sql01")
            .with_payload_field("event")
            .with_field_ops(
                vec!["source:jobtrail".to_string()],
                vec!["event.job_name:job".to_string()],
                vec!["event.message:msg".to_string()],
            );
        let t = Transformer::new(&source, server()).unwrap();
        let record = delivered(t.process(&event(0, 0, "2024-03-01T08:00:00Z")).unwrap());

        assert_eq!(record.get("source"), Some(&Value::from("jobtrail")));
        assert_eq!(record.get("job"), Some(&Value::from("Nightly")));
        assert_eq!(record.get("msg"), Some(&Value::from("The job failed.")));
        assert!(record.get_path("event.message").is_none());
        assert!(record.get_path("event.job_name").is_some());
    }

    #[test]
    fn test_instance_name_override() {
        let mut source = SourceConfig::new("sql01");
        source.server_instance_name = Some("prod-primary".to_string());
        let t = Transformer::new(&source, server()).unwrap();
        let record = delivered(t.process(&event(0, 1, "2024-03-01T08:00:00Z")).unwrap());
        assert_eq!(
            record.get("server_instance_name"),
            Some(&Value::from("prod-primary"))
        );
    }

    #[test]
    fn test_bad_timestamp_is_decode_error() {
        let t = Transformer::new(&SourceConfig::new("sql01"), server()).unwrap();
        let err = t.process(&event(0, 1, "not a time")).unwrap_err();
        assert!(matches!(err, IngestError::ScanDecode { cursor: 42, .. }));
    }
}
