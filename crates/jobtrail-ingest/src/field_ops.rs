//! Field operations applied to a record before it is serialized
//!
//! Configured as plain strings:
//!
//! - add: `"path:value"` inserts or overwrites `path` with the string `value`; the
//!   values `$(date)` and `$(now)` are replaced by the current UTC time
//! - copy: `"from:to"` duplicates `from` into `to`, leaving `from` in place
//! - move: `"from:to"` relocates `from` to `to`
//!
//! Adds run first, then copies, then moves, each list in configured order. A copy or
//! move whose source is absent does nothing, so replaying any list is harmless.

use chrono::Utc;

use crate::error::{IngestError, Result};
use crate::record::{Record, Value};

const NOW_PLACEHOLDERS: [&str; 2] = ["$(date)", "$(now)"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    Add { path: String, value: String },
    Copy { from: String, to: String },
    Move { from: String, to: String },
}

impl FieldOp {
    pub fn parse_add(text: &str) -> Result<Self> {
        let (path, value) = split_pair("add", text)?;
        Ok(Self::Add { path, value })
    }

    pub fn parse_copy(text: &str) -> Result<Self> {
        let (from, to) = split_pair("copy", text)?;
        Ok(Self::Copy { from, to })
    }

    pub fn parse_move(text: &str) -> Result<Self> {
        let (from, to) = split_pair("move", text)?;
        Ok(Self::Move { from, to })
    }

    pub fn apply(&self, record: &mut Record) {
        match self {
            FieldOp::Add { path, value } => {
                let value = if NOW_PLACEHOLDERS.contains(&value.as_str()) {
                    Value::Timestamp(Utc::now())
                } else {
                    Value::from(value.as_str())
                };
                record.set_path(path, value);
            },
            FieldOp::Copy { from, to } => {
                if let Some(value) = record.get_path(from).cloned() {
                    record.set_path(to, value);
                }
            },
            FieldOp::Move { from, to } => {
                if from == to {
                    return;
                }
                if let Some(value) = record.remove_path(from) {
                    record.set_path(to, value);
                }
            },
        }
    }
}

/// Split `"left:right"` on the first colon, so add values may themselves contain colons
fn split_pair(kind: &str, text: &str) -> Result<(String, String)> {
    let (left, right) = text
        .split_once(':')
        .ok_or_else(|| IngestError::config(format!("{} '{}': expected 'a:b'", kind, text)))?;
    let left = left.trim();
    if left.is_empty() || left.split('.').any(str::is_empty) {
        return Err(IngestError::config(format!(
            "{} '{}': empty field path",
            kind, text
        )));
    }
    let right = if kind == "add" { right } else { right.trim() };
    if kind != "add" && (right.is_empty() || right.split('.').any(str::is_empty)) {
        return Err(IngestError::config(format!(
            "{} '{}': empty destination path",
            kind, text
        )));
    }
    Ok((left.to_string(), right.to_string()))
}

/// The compiled, ordered operation list for one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldOps {
    ops: Vec<FieldOp>,
}

impl FieldOps {
    pub fn parse(adds: &[String], copies: &[String], moves: &[String]) -> Result<Self> {
        let mut ops = Vec::with_capacity(adds.len() + copies.len() + moves.len());
        for text in adds {
            ops.push(FieldOp::parse_add(text)?);
        }
        for text in copies {
            ops.push(FieldOp::parse_copy(text)?);
        }
        for text in moves {
            ops.push(FieldOp::parse_move(text)?);
        }
        Ok(Self { ops })
    }

    pub fn apply(&self, record: &mut Record) {
        for op in &self.ops {
            op.apply(record);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base() -> Record {
        let mut r = Record::new();
        r.set("job_name", "nightly backup");
        r.set("run_status", 0);
        r
    }

    #[test]
    fn test_add_keeps_colons_in_value() {
        let op = FieldOp::parse_add("meta.url:http://example.com:8080").unwrap();
        let mut r = base();
        op.apply(&mut r);
        assert_eq!(
            r.get_path("meta.url"),
            Some(&Value::from("http://example.com:8080"))
        );
    }

    #[test]
    fn test_add_now_placeholder() {
        let mut r = base();
        FieldOp::parse_add("shipped_at:$(now)").unwrap().apply(&mut r);
        assert!(matches!(r.get("shipped_at"), Some(Value::Timestamp(_))));
    }

    #[test]
    fn test_add_overwrites() {
        let mut r = base();
        FieldOp::parse_add("job_name:replaced").unwrap().apply(&mut r);
        assert_eq!(r.get("job_name"), Some(&Value::from("replaced")));
    }

    #[test]
    fn test_copy_twice_is_stable() {
        let op = FieldOp::parse_copy("job_name:labels.job").unwrap();
        let mut r = base();
        op.apply(&mut r);
        op.apply(&mut r);
        assert_eq!(r.get("job_name"), Some(&Value::from("nightly backup")));
        assert_eq!(r.get_path("labels.job"), r.get("job_name"));
    }

    #[test]
    fn test_move_twice_is_noop_second_time() {
        let op = FieldOp::parse_move("run_status:status.code").unwrap();
        let mut r = base();
        op.apply(&mut r);
        let after_first = r.clone();
        op.apply(&mut r);
        assert_eq!(r, after_first);
        assert!(r.get("run_status").is_none());
        assert_eq!(r.get_path("status.code"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_missing_source_is_noop() {
        let mut r = base();
        let before = r.clone();
        FieldOp::parse_copy("nope:other").unwrap().apply(&mut r);
        FieldOp::parse_move("nope:other").unwrap().apply(&mut r);
        assert_eq!(r, before);
    }

    #[test]
    fn test_order_is_adds_copies_moves() {
        let ops = FieldOps::parse(
            &["env:prod".to_string()],
            &["env:environment".to_string()],
            &["environment:tags.env".to_string()],
        )
        .unwrap();
        let mut r = base();
        ops.apply(&mut r);
        assert_eq!(r.get("env"), Some(&Value::from("prod")));
        assert!(r.get("environment").is_none());
        assert_eq!(r.get_path("tags.env"), Some(&Value::from("prod")));
    }

    #[test]
    fn test_rejects_malformed_pairs() {
        assert!(FieldOp::parse_add("novalue").is_err());
        assert!(FieldOp::parse_copy(":dest").is_err());
        assert!(FieldOp::parse_move("src:").is_err());
        assert!(FieldOp::parse_move("a..b:c").is_err());
    }
}
