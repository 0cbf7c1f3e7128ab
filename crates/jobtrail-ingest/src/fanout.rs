//! Lifecycle of the sinks used by one run
//!
//! `open_all` → `write`* → `finish` (flush then clean every sink) → `close_all`.
//! A write failure aborts immediately. Flush and clean always visit every sink and
//! report the last error seen, so one broken destination cannot hide behind another.

use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::record::Record;
use crate::sink::Sink;
use crate::transform::RecordKind;

pub struct SinkFanout {
    sinks: Vec<Box<dyn Sink>>,
    opened: usize,
}

impl SinkFanout {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks, opened: 0 }
    }

    /// Open every sink under `id`, stopping at the first failure
    ///
    /// Sinks opened before the failure are still closed by [`close_all`](Self::close_all).
    pub async fn open_all(&mut self, id: &str) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.open(id).await.map_err(|source| IngestError::SinkOpen {
                sink: sink.name().to_string(),
                source,
            })?;
            self.opened += 1;
            debug!(sink = sink.name(), id, "sink opened");
        }
        Ok(())
    }

    /// Serialize once and hand the line to every sink in order
    ///
    /// Returns the total bytes acknowledged.
    pub async fn write(&mut self, kind: RecordKind, record: &Record) -> Result<u64> {
        let line = record.to_json()?;
        let mut acked = 0;
        for sink in self.sinks.iter_mut().take(self.opened) {
            acked += sink
                .write(kind, &line)
                .await
                .map_err(|source| IngestError::SinkWrite {
                    sink: sink.name().to_string(),
                    source,
                })?;
        }
        Ok(acked)
    }

    /// Flush then clean every opened sink
    pub async fn finish(&mut self) -> Result<()> {
        let mut last_error = None;

        for sink in self.sinks.iter_mut().take(self.opened) {
            if let Err(source) = sink.flush().await {
                warn!(sink = sink.name(), error = %source, "sink flush failed");
                last_error = Some(IngestError::SinkFlush {
                    sink: sink.name().to_string(),
                    source,
                });
            }
        }

        for sink in self.sinks.iter_mut().take(self.opened) {
            if let Err(source) = sink.clean().await {
                warn!(sink = sink.name(), error = %source, "sink clean failed");
                last_error = Some(IngestError::SinkClean {
                    sink: sink.name().to_string(),
                    source,
                });
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close every opened sink; failures are logged, never returned
    pub async fn close_all(&mut self) {
        for sink in self.sinks.iter_mut().take(self.opened) {
            if let Err(e) = sink.close().await {
                warn!(sink = sink.name(), error = %e, "sink close failed");
            }
        }
        self.opened = 0;
    }
}
