//! Process input origins (stdin)

use super::pump::{BoxedReader, PumpTask, PumpMode, WriterSink};
use super::{AttachState, PipeOrHandle, StandardStream};
use crate::config::StreamConfig;
use crate::consumer::{ChunkFeeder, DataConsumer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::net::unix::pipe;
use tracing::{debug, warn};

/// Kind of origin behind a [`ProcessInput`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// Bytes pushed through an [`InputConsumer`]
    Consumer,
    /// Bytes written through an [`InputWriter`]
    Stream,
    /// A fixed buffer sent once
    Bytes,
}

enum InputOrigin {
    Consumer(InputConsumer),
    Stream,
    Bytes(Arc<[u8]>),
}

/// Input of a process.
///
/// Attaching creates an OS pipe: the process reads one end, a pump writes the
/// origin's bytes into the other in order and closes it at the origin's EOF.
pub struct ProcessInput {
    origin: InputOrigin,
    state: AttachState,
    reader: Option<BoxedReader>,
    pump: Option<PumpTask>,
    config: StreamConfig,
}

impl fmt::Debug for ProcessInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInput")
            .field("kind", &self.kind())
            .field("state", &self.state)
            .finish()
    }
}

impl ProcessInput {
    fn new(origin: InputOrigin, reader: Option<BoxedReader>) -> Self {
        Self {
            origin,
            state: AttachState::Unattached,
            reader,
            pump: None,
            config: StreamConfig::default(),
        }
    }

    /// Input fed by pushing bytes into the returned consumer.
    ///
    /// Bytes pushed before attach are queued. Closing the consumer signals EOF.
    pub fn from_consumer() -> (Self, InputConsumer) {
        let (feeder, reader) = ChunkFeeder::pair();
        let consumer = InputConsumer {
            feeder: Arc::new(feeder),
        };
        (
            Self::new(InputOrigin::Consumer(consumer.clone()), Some(Box::new(reader))),
            consumer,
        )
    }

    /// Input fed through the returned writer.
    ///
    /// The writer buffers at most one chunk (see [`StreamConfig::chunk_size`]);
    /// beyond that, writes wait for the process to read. Shutting the writer
    /// down signals EOF.
    pub fn from_stream() -> (Self, InputWriter) {
        Self::from_stream_with_config(StreamConfig::default())
    }

    /// [`ProcessInput::from_stream`] with explicit stream tuning
    pub fn from_stream_with_config(config: StreamConfig) -> (Self, InputWriter) {
        let (writer, reader) = tokio::io::duplex(config.chunk_size.max(1));
        let mut input = Self::new(InputOrigin::Stream, Some(Box::new(reader)));
        input.config = config;
        (input, InputWriter { inner: writer })
    }

    /// Input that sends `data` once, followed by EOF
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(InputOrigin::Bytes(data.into()), None)
    }

    /// Replace the stream tuning
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Kind of origin
    pub fn kind(&self) -> InputKind {
        match self.origin {
            InputOrigin::Consumer(_) => InputKind::Consumer,
            InputOrigin::Stream => InputKind::Stream,
            InputOrigin::Bytes(_) => InputKind::Bytes,
        }
    }

    /// The fixed buffer of a [`InputKind::Bytes`] input
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.origin {
            InputOrigin::Bytes(data) => Some(data),
            _ => None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> AttachState {
        self.state
    }

    /// Push more bytes behind the origin.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceAlreadyClosed`] for fixed-bytes inputs (their data is
    ///   complete) and for consumer inputs that have been closed or detached
    /// - [`Error::NotSupported`] for stream inputs, which are written through
    ///   their [`InputWriter`]
    pub fn push(&self, data: &[u8]) -> Result<()> {
        match &self.origin {
            InputOrigin::Consumer(consumer) => consumer.write(data),
            InputOrigin::Bytes(_) => Err(Error::SourceAlreadyClosed),
            InputOrigin::Stream => Err(Error::NotSupported(
                "stream inputs are written through their InputWriter".to_string(),
            )),
        }
    }

    async fn open_pipe(&mut self) -> Result<OwnedFd> {
        self.state.begin_attach()?;
        let (reader, writer) = std::io::pipe()?;
        let sender = pipe::Sender::from_owned_fd(writer.into())?;
        let source: BoxedReader = match &self.origin {
            InputOrigin::Bytes(data) => Box::new(io::Cursor::new(data.clone())),
            InputOrigin::Consumer(_) | InputOrigin::Stream => match self.reader.take() {
                Some(reader) => reader,
                None => return Err(Error::SourceAlreadyClosed),
            },
        };
        self.pump = Some(PumpTask::spawn(
            "input pipe",
            source,
            Box::new(WriterSink(sender)),
            PumpMode::UntilEof,
            &self.config,
        ));
        debug!(kind = ?self.kind(), "input attached");
        Ok(reader.into())
    }

    async fn teardown(&mut self) -> Result<()> {
        if !self.state.begin_detach() {
            return Ok(());
        }
        if let InputOrigin::Consumer(consumer) = &self.origin {
            consumer.close();
        }
        self.reader.take();
        let result = match self.pump.take() {
            Some(task) => task.stop().await.map(|_| ()),
            None => Ok(()),
        };
        debug!(kind = ?self.kind(), "input detached");
        result
    }

    /// Detach, surfacing a pump failure instead of swallowing it.
    ///
    /// A process that exits without reading all of its input breaks the pipe;
    /// that is reported here as [`Error::IoFailure`].
    pub async fn finish(&mut self) -> Result<()> {
        self.teardown().await
    }
}

#[async_trait]
impl StandardStream for ProcessInput {
    async fn attach_to_handle(&mut self) -> Result<OwnedFd> {
        self.open_pipe().await
    }

    async fn attach_to_pipe_or_handle(&mut self) -> Result<PipeOrHandle> {
        Ok(PipeOrHandle::Pipe(self.open_pipe().await?))
    }

    async fn detach(&mut self) -> Result<()> {
        if let Err(e) = self.teardown().await {
            warn!(error = %e, kind = ?self.kind(), "input pump failed during detach");
        }
        Ok(())
    }
}

/// Push handle of a [`ProcessInput::from_consumer`] input
#[derive(Clone)]
pub struct InputConsumer {
    feeder: Arc<ChunkFeeder>,
}

impl fmt::Debug for InputConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputConsumer")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl InputConsumer {
    /// Queue bytes for the process
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.feeder
            .consume(data)
            .map_err(|_| Error::SourceAlreadyClosed)
    }

    /// Signal EOF. Later writes fail with [`Error::SourceAlreadyClosed`].
    pub fn close(&self) {
        self.feeder.close();
    }

    /// Whether EOF has been signalled or the input torn down
    pub fn is_closed(&self) -> bool {
        self.feeder.is_closed()
    }
}

impl DataConsumer for InputConsumer {
    fn consume(&self, data: &[u8]) -> io::Result<()> {
        self.feeder.consume(data)
    }

    fn consume_end_of_file(&self) -> io::Result<()> {
        self.feeder.consume_end_of_file()
    }
}

/// Write handle of a [`ProcessInput::from_stream`] input
#[derive(Debug)]
pub struct InputWriter {
    inner: DuplexStream,
}

impl AsyncWrite for InputWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
