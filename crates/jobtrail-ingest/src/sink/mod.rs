//! Delivery destinations
//!
//! A sink is opened once per run with the id of the server being shipped, receives
//! every delivered record in cursor order, and is flushed and cleaned before the
//! checkpoint may advance. Implementations own their buffering; `write` returning
//! `Ok` only means the record was accepted, `flush` is the durability point.

pub mod file;
pub mod stdout;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SinkSettings;
use crate::transform::RecordKind;

pub use file::FileSink;
pub use stdout::StdoutSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink is not open")]
    NotOpen,

    #[error("rejected: {0}")]
    Rejected(String),
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// A delivery destination
#[async_trait]
pub trait Sink: Send {
    /// Stable name used in logs and errors
    fn name(&self) -> &str;

    /// Prepare for writes on behalf of `id`
    async fn open(&mut self, id: &str) -> SinkResult<()>;

    /// Accept one serialized record; returns the number of bytes taken
    async fn write(&mut self, kind: RecordKind, line: &str) -> SinkResult<u64>;

    /// Make everything written so far durable
    async fn flush(&mut self) -> SinkResult<()>;

    /// Housekeeping after a flush
    async fn clean(&mut self) -> SinkResult<()>;

    /// Release resources; called on every exit path
    async fn close(&mut self) -> SinkResult<()>;
}

/// Builds a fresh set of sinks for each run
pub trait SinkFactory: Send + Sync {
    fn build(&self) -> Vec<Box<dyn Sink>>;
}

/// Sinks described by the `[[sinks]]` settings
#[derive(Debug, Clone)]
pub struct ConfiguredSinks {
    settings: Vec<SinkSettings>,
}

impl ConfiguredSinks {
    pub fn new(settings: Vec<SinkSettings>) -> Self {
        Self { settings }
    }
}

impl SinkFactory for ConfiguredSinks {
    fn build(&self) -> Vec<Box<dyn Sink>> {
        self.settings
            .iter()
            .map(|s| -> Box<dyn Sink> {
                match s {
                    SinkSettings::File { dir, retain_hours } => {
                        Box::new(FileSink::new(dir.clone()).with_retention(*retain_hours))
                    },
                    SinkSettings::Stdout => Box::new(StdoutSink::new()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_configured_sinks_build_in_order() {
        let factory = ConfiguredSinks::new(vec![
            SinkSettings::Stdout,
            SinkSettings::File {
                dir: PathBuf::from("/tmp/jobtrail-out"),
                retain_hours: Some(24),
            },
        ]);

        let sinks = factory.build();
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["stdout", "file:/tmp/jobtrail-out"]);
    }
}
