//! Source connectors
//!
//! A connector resolves who the monitored server is and hands out history rows with a
//! cursor strictly greater than the one asked for, in ascending cursor order. The
//! pipeline never issues an unbounded query; it pages with `fetch_after`.

pub mod export;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use jobtrail_common::JobtrailError;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::identity::ServerInfo;
use crate::transform::RawEvent;

pub use export::ExportConnector;

#[async_trait]
pub trait SourceConnector: Send {
    /// Identity of the server behind this connection
    async fn server_info(&mut self) -> Result<ServerInfo>;

    /// Up to `limit` rows with `instance_id > cursor`, ascending
    async fn fetch_after(&mut self, cursor: i64, limit: usize) -> Result<Vec<RawEvent>>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens a connector for a configured source
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(&self, source: &SourceConfig) -> Result<Box<dyn SourceConnector>>;
}

/// Combine the integer `run_date` (`yyyymmdd`) and `run_time` (`hhmmss`, not padded)
/// columns of job history into a local timestamp
pub fn parse_agent_time(run_date: i32, run_time: i32) -> std::result::Result<NaiveDateTime, JobtrailError> {
    let text = format!("{}{:06}", run_date, run_time);
    NaiveDateTime::parse_from_str(&text, "%Y%m%d%H%M%S")
        .map_err(|e| JobtrailError::invalid_timestamp(text, e.to_string()))
}
