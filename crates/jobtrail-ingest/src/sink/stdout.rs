//! Standard output sink, one JSON document per line
//!
//! Every run in the process writes through the same buffered handle, and each line
//! goes in under its lock, so records of sibling runs never splice.

use async_trait::async_trait;
use std::sync::{Arc, LazyLock};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter, Stdout};
use tokio::sync::Mutex;

use super::{Sink, SinkError, SinkResult};
use crate::transform::RecordKind;

/// A buffered writer shared by every sink that targets it
pub type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

static STDOUT: LazyLock<SharedWriter<Stdout>> =
    LazyLock::new(|| Arc::new(Mutex::new(BufWriter::new(tokio::io::stdout()))));

pub struct StdoutSink<W = Stdout> {
    out: SharedWriter<W>,
    open: bool,
}

impl StdoutSink<Stdout> {
    pub fn new() -> Self {
        Self::with_writer(Arc::clone(&STDOUT))
    }
}

impl Default for StdoutSink<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdoutSink<W> {
    pub fn with_writer(out: SharedWriter<W>) -> Self {
        Self { out, open: false }
    }
}

#[async_trait]
impl<W> Sink for StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &str {
        "stdout"
    }

    async fn open(&mut self, _id: &str) -> SinkResult<()> {
        self.open = true;
        Ok(())
    }

    async fn write(&mut self, _kind: RecordKind, line: &str) -> SinkResult<u64> {
        if !self.open {
            return Err(SinkError::NotOpen);
        }
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        Ok(line.len() as u64 + 1)
    }

    async fn flush(&mut self) -> SinkResult<()> {
        if self.open {
            self.out.lock().await.flush().await?;
        }
        Ok(())
    }

    async fn clean(&mut self) -> SinkResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> SinkResult<()> {
        let result = self.flush().await;
        self.open = false;
        result
    }
}
