//! Background byte pump bridging two representations of one stream.

use crate::config::StreamConfig;
use crate::consumer::DataConsumer;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Destination of a pump
#[async_trait]
pub(crate) trait ByteSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Called once after the last chunk
    async fn finish(&mut self) -> io::Result<()>;
}

/// Forwards into a [`DataConsumer`]
pub(crate) struct ConsumerSink(pub(crate) Arc<dyn DataConsumer>);

#[async_trait]
impl ByteSink for ConsumerSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.0.consume(chunk)
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.0.consume_end_of_file()
    }
}

/// Writes into an `AsyncWrite`, shutting it down at the end
pub(crate) struct WriterSink<W>(pub(crate) W);

#[async_trait]
impl<W> ByteSink for WriterSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.0.write_all(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.0.flush().await?;
        self.0.shutdown().await
    }
}

/// How a pump treats a zero-length read
#[derive(Clone, Copy, Debug)]
pub(crate) enum PumpMode {
    /// EOF ends the pump (pipes, in-memory sources)
    UntilEof,
    /// EOF means "nothing yet": poll again until cancelled (a file still being written)
    Follow { poll_interval: Duration },
}

#[derive(Clone, Copy, Debug)]
struct PumpSettings {
    chunk_size: usize,
    drain_timeout: Duration,
}

/// A running pump. Dropping it cancels the task without waiting.
pub(crate) struct PumpTask {
    label: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<io::Result<u64>>>,
}

impl PumpTask {
    pub(crate) fn spawn(
        label: &'static str,
        reader: BoxedReader,
        sink: Box<dyn ByteSink>,
        mode: PumpMode,
        config: &StreamConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let settings = PumpSettings {
            chunk_size: config.chunk_size.max(1),
            drain_timeout: config.drain_timeout,
        };
        let token = cancel.clone();
        let handle = tokio::spawn(run_pump(label, reader, sink, mode, settings, token));
        tracing::debug!(pump = label, ?mode, "pump started");
        Self {
            label,
            cancel,
            handle: Some(handle),
        }
    }

    /// Ask the pump to drain and stop, then wait for it.
    ///
    /// Returns the number of bytes copied over the pump's lifetime.
    pub(crate) async fn stop(mut self) -> Result<u64> {
        self.cancel.cancel();
        self.join_inner().await
    }

    /// Wait for the pump to end on its own (source EOF).
    pub(crate) async fn join(mut self) -> Result<u64> {
        self.join_inner().await
    }

    async fn join_inner(&mut self) -> Result<u64> {
        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        match handle.await {
            Ok(Ok(bytes)) => {
                tracing::debug!(pump = self.label, bytes, "pump finished");
                Ok(bytes)
            }
            Ok(Err(e)) => Err(Error::io_failure(format!("pumping {}", self.label), e)),
            Err(e) => Err(Error::io_failure(
                format!("pumping {}", self.label),
                io::Error::other(format!("pump task panicked: {}", e)),
            )),
        }
    }
}

impl Drop for PumpTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_pump(
    label: &'static str,
    mut reader: BoxedReader,
    mut sink: Box<dyn ByteSink>,
    mode: PumpMode,
    settings: PumpSettings,
    cancel: CancellationToken,
) -> io::Result<u64> {
    let mut buf = vec![0u8; settings.chunk_size];
    let mut total: u64 = 0;
    let mut draining = false;

    loop {
        let read = if draining {
            match tokio::time::timeout(settings.drain_timeout, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    tracing::debug!(pump = label, "drain timed out with writer still open");
                    break;
                }
            }
        } else {
            tokio::select! {
                biased;
                read = reader.read(&mut buf) => read,
                _ = cancel.cancelled() => {
                    draining = true;
                    continue;
                }
            }
        };

        let n = match read {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(pump = label, error = %e, "pump read failed");
                let _ = sink.finish().await;
                return Err(e);
            }
        };

        if n == 0 {
            match mode {
                PumpMode::Follow { poll_interval } if !draining => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = cancel.cancelled() => draining = true,
                    }
                    continue;
                }
                _ => break,
            }
        }

        // A sink that stops accepting bytes is abandoned `drain_timeout` after cancel.
        let written = {
            let write = sink.write_chunk(&buf[..n]);
            let hard_stop = async {
                cancel.cancelled().await;
                tokio::time::sleep(settings.drain_timeout).await;
            };
            tokio::select! {
                biased;
                result = write => Some(result),
                _ = hard_stop => None,
            }
        };
        match written {
            Some(Ok(())) => total += n as u64,
            Some(Err(e)) => {
                tracing::warn!(pump = label, error = %e, "pump write failed");
                let _ = sink.finish().await;
                return Err(e);
            }
            None => {
                tracing::warn!(pump = label, bytes = total, "sink stalled after cancel, abandoning it");
                let _ = tokio::time::timeout(settings.drain_timeout, sink.finish()).await;
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "sink stopped accepting bytes",
                ));
            }
        }
    }

    sink.finish().await?;
    Ok(total)
}
