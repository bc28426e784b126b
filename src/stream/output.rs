//! Process output destinations (stdout / stderr)

use super::pump::{BoxedReader, ConsumerSink, PumpMode, PumpTask};
use super::{AttachState, NULL_DEVICE, PipeOrHandle, StandardStream};
use crate::config::StreamConfig;
use crate::consumer::{
    ChunkFeeder, DataConsumer, DiscardConsumer, EndOnce, FileConsumer, LineLogConsumer,
    SharedBuffer,
};
use crate::error::{Error, Result};
use crate::logger::Logger;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};
use tempfile::TempPath;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::unix::pipe;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

type PumpSlot = Arc<Mutex<Option<PumpTask>>>;

/// Where a [`ProcessOutput`] sends bytes
#[derive(Clone)]
pub enum OutputTarget {
    /// Discard
    NullDevice,
    /// Write to a file at this path
    FilePath(PathBuf),
    /// Expose as a [`LazyInputStream`] handed out by [`ProcessOutput::input_stream`]
    InputStream,
    /// Push into a consumer
    Consumer(Arc<dyn DataConsumer>),
    /// Log line by line
    Logger(Arc<dyn Logger>),
    /// Append to a caller-owned buffer
    Buffer(SharedBuffer),
    /// Append to a caller-owned buffer that is read back as text
    Text(SharedBuffer),
}

impl OutputTarget {
    fn describe(&self) -> String {
        match self {
            OutputTarget::NullDevice => NULL_DEVICE.to_string(),
            OutputTarget::FilePath(path) => path.display().to_string(),
            OutputTarget::InputStream => "input stream".to_string(),
            OutputTarget::Consumer(_) => "data consumer".to_string(),
            OutputTarget::Logger(_) => "logger".to_string(),
            OutputTarget::Buffer(_) => "buffer".to_string(),
            OutputTarget::Text(_) => "text buffer".to_string(),
        }
    }
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::FilePath(path) => f.debug_tuple("FilePath").field(path).finish(),
            OutputTarget::Buffer(buffer) => f.debug_tuple("Buffer").field(&buffer.len()).finish(),
            OutputTarget::Text(buffer) => f.debug_tuple("Text").field(&buffer.len()).finish(),
            other => f.write_str(&other.describe()),
        }
    }
}

/// Output of a process.
///
/// The sink can be materialized exactly once, as a descriptor
/// ([`StandardStream`]), a file path ([`ProcessOutput::provided_through_file`])
/// or a consumer ([`ProcessOutput::provided_through_consumer`]).
pub struct ProcessOutput {
    target: OutputTarget,
    state: AttachState,
    stream_tx: Option<oneshot::Sender<BoxedReader>>,
    pump: PumpSlot,
    scratch: Option<TempPath>,
    materialized: Option<Arc<dyn DataConsumer>>,
    diagnostics: Option<Arc<dyn Logger>>,
    config: StreamConfig,
}

impl fmt::Debug for ProcessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOutput")
            .field("target", &self.target)
            .field("state", &self.state)
            .finish()
    }
}

impl ProcessOutput {
    fn new(target: OutputTarget) -> Self {
        Self {
            target,
            state: AttachState::Unattached,
            stream_tx: None,
            pump: Arc::new(Mutex::new(None)),
            scratch: None,
            materialized: None,
            diagnostics: None,
            config: StreamConfig::default(),
        }
    }

    /// Output to `/dev/null`
    pub fn null_device() -> Self {
        Self::new(OutputTarget::NullDevice)
    }

    /// Output to a file.
    ///
    /// The file is created (or truncated) on attach and by
    /// [`ProcessOutput::provided_through_consumer`].
    /// [`ProcessOutput::provided_through_file`] hands out the path untouched.
    pub fn file_path(path: impl Into<PathBuf>) -> Self {
        Self::new(OutputTarget::FilePath(path.into()))
    }

    /// Output readable as a stream.
    ///
    /// The stream yields nothing until the output is attached, and EOF if the
    /// output is detached without ever being attached.
    pub fn input_stream() -> (Self, LazyInputStream) {
        let (tx, rx) = oneshot::channel();
        let mut output = Self::new(OutputTarget::InputStream);
        output.stream_tx = Some(tx);
        (output, LazyInputStream::new(rx))
    }

    /// Output pushed into a consumer
    pub fn data_consumer(consumer: Arc<dyn DataConsumer>) -> Self {
        Self::new(OutputTarget::Consumer(consumer))
    }

    /// Output pushed into a consumer, with failures to deliver reported to `logger`
    pub fn data_consumer_with_logger(
        consumer: Arc<dyn DataConsumer>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let mut output = Self::new(OutputTarget::Consumer(consumer));
        output.diagnostics = Some(logger);
        output
    }

    /// Output logged line by line
    pub fn logger(logger: Arc<dyn Logger>) -> Self {
        Self::new(OutputTarget::Logger(logger))
    }

    /// Output appended to a caller-owned buffer
    pub fn buffer(buffer: SharedBuffer) -> Self {
        Self::new(OutputTarget::Buffer(buffer))
    }

    /// Output appended to a caller-owned buffer, read back with [`ProcessOutput::text_contents`]
    pub fn text(buffer: SharedBuffer) -> Self {
        Self::new(OutputTarget::Text(buffer))
    }

    /// Replace the stream tuning
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// The destination
    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    /// Current lifecycle state
    pub fn state(&self) -> AttachState {
        self.state
    }

    /// Buffer contents decoded as text, for [`OutputTarget::Text`] outputs
    pub fn text_contents(&self) -> Option<String> {
        match &self.target {
            OutputTarget::Text(buffer) => Some(buffer.to_string_lossy()),
            _ => None,
        }
    }

    /// Buffer contents decoded as text for either buffer variant
    pub(crate) fn captured_text(&self) -> Option<String> {
        match &self.target {
            OutputTarget::Text(buffer) | OutputTarget::Buffer(buffer) => {
                Some(buffer.to_string_lossy())
            }
            _ => None,
        }
    }

    /// Materialize as a file path for APIs that can only write to a path.
    ///
    /// File and null-device outputs return their own path and need no pump.
    /// Every other output gets a scratch file that is tailed into the native
    /// destination between [`FileOutputProvider::start_reading`] and
    /// [`FileOutputProvider::stop_reading`].
    pub async fn provided_through_file(&mut self) -> Result<FileOutputProvider> {
        self.state.begin_attach()?;
        match &self.target {
            OutputTarget::NullDevice => Ok(FileOutputProvider::direct(PathBuf::from(NULL_DEVICE))),
            OutputTarget::FilePath(path) => Ok(FileOutputProvider::direct(path.clone())),
            _ => {
                let scratch_dir = self.config.scratch_dir();
                let scratch = tempfile::Builder::new()
                    .prefix("procpipe-")
                    .suffix(".out")
                    .tempfile_in(&scratch_dir)
                    .map_err(|e| Error::sink_unavailable(scratch_dir.display().to_string(), e))?
                    .into_temp_path();
                let path = scratch.to_path_buf();
                let consumer = self.native_consumer()?;
                self.scratch = Some(scratch);
                debug!(path = %path.display(), sink = ?self.target, "bridging output through scratch file");
                Ok(FileOutputProvider {
                    path,
                    bridge: Some(FileBridge {
                        consumer,
                        pump: self.pump.clone(),
                        started: AtomicBool::new(false),
                        config: self.config.clone(),
                    }),
                })
            }
        }
    }

    /// Materialize as a push consumer
    pub async fn provided_through_consumer(&mut self) -> Result<Arc<dyn DataConsumer>> {
        self.state.begin_attach()?;
        self.native_consumer()
    }

    /// The consumer that writes into this output's native destination.
    ///
    /// It is kept so that teardown can deliver end-of-file to it.
    fn native_consumer(&mut self) -> Result<Arc<dyn DataConsumer>> {
        let consumer: Arc<dyn DataConsumer> = Arc::new(EndOnce::new(self.destination()?));
        self.materialized = Some(consumer.clone());
        Ok(consumer)
    }

    fn destination(&mut self) -> Result<Arc<dyn DataConsumer>> {
        Ok(match &self.target {
            OutputTarget::NullDevice => Arc::new(DiscardConsumer),
            OutputTarget::FilePath(path) => Arc::new(
                FileConsumer::create(path)
                    .map_err(|e| Error::sink_unavailable(path.display().to_string(), e))?,
            ),
            OutputTarget::InputStream => {
                let tx = self
                    .stream_tx
                    .take()
                    .ok_or_else(|| Error::sink_unavailable("input stream", "stream was dropped"))?;
                let (feeder, reader) = ChunkFeeder::pair();
                tx.send(Box::new(reader))
                    .map_err(|_| Error::sink_unavailable("input stream", "reader was dropped"))?;
                Arc::new(feeder)
            }
            OutputTarget::Consumer(consumer) => consumer.clone(),
            OutputTarget::Logger(logger) => Arc::new(LineLogConsumer::new(logger.clone())),
            OutputTarget::Buffer(buffer) | OutputTarget::Text(buffer) => Arc::new(buffer.clone()),
        })
    }

    async fn open_handle(&mut self) -> Result<PipeOrHandle> {
        self.state.begin_attach()?;
        match &self.target {
            OutputTarget::NullDevice => {
                let file = std::fs::OpenOptions::new()
                    .write(true)
                    .open(NULL_DEVICE)
                    .map_err(|e| Error::sink_unavailable(NULL_DEVICE, e))?;
                Ok(PipeOrHandle::Handle(file.into()))
            }
            OutputTarget::FilePath(path) => {
                let file = tokio::fs::File::create(path)
                    .await
                    .map_err(|e| Error::sink_unavailable(path.display().to_string(), e))?;
                Ok(PipeOrHandle::Handle(file.into_std().await.into()))
            }
            OutputTarget::InputStream => {
                let (reader, writer) = std::io::pipe().map_err(|e| Error::sink_unavailable("pipe", e))?;
                let receiver = pipe::Receiver::from_owned_fd(reader.into())
                    .map_err(|e| Error::sink_unavailable("pipe", e))?;
                let tx = self
                    .stream_tx
                    .take()
                    .ok_or_else(|| Error::sink_unavailable("input stream", "stream was dropped"))?;
                // A dropped stream just means nobody reads; the writer end still works.
                if tx.send(Box::new(receiver)).is_err() {
                    debug!("input stream dropped before attach");
                }
                Ok(PipeOrHandle::Pipe(writer.into()))
            }
            _ => {
                let (reader, writer) = std::io::pipe().map_err(|e| Error::sink_unavailable("pipe", e))?;
                let receiver = pipe::Receiver::from_owned_fd(reader.into())
                    .map_err(|e| Error::sink_unavailable("pipe", e))?;
                let consumer = self.native_consumer()?;
                let task = PumpTask::spawn(
                    "output pipe",
                    Box::new(receiver),
                    Box::new(ConsumerSink(consumer)),
                    PumpMode::UntilEof,
                    &self.config,
                );
                *self.pump.lock().await = Some(task);
                Ok(PipeOrHandle::Pipe(writer.into()))
            }
        }
    }

    async fn teardown(&mut self) -> Result<()> {
        if !self.state.begin_detach() {
            return Ok(());
        }
        // A stream that was never materialized reads EOF from here on.
        self.stream_tx.take();
        let pump = self.pump.lock().await.take();
        let mut result = match pump {
            Some(task) => task.stop().await.map(|_| ()),
            None => Ok(()),
        };
        if let Some(consumer) = self.materialized.take()
            && let Err(e) = consumer.consume_end_of_file()
            && result.is_ok()
        {
            result = Err(Error::io_failure("closing output", e));
        }
        if let (Err(e), Some(logger)) = (&result, &self.diagnostics) {
            logger.log(&format!("output to {} failed: {e}", self.target.describe()));
        }
        if let Some(scratch) = self.scratch.take()
            && let Err(e) = scratch.close()
        {
            debug!(error = %e, "scratch file already gone");
        }
        debug!(sink = ?self.target, "output detached");
        result
    }

    /// Detach, surfacing a pump failure instead of swallowing it.
    ///
    /// Resources are released either way; calling it again (or calling
    /// [`StandardStream::detach`]) afterwards is a no-op.
    pub async fn finish(&mut self) -> Result<()> {
        self.teardown().await
    }
}

#[async_trait]
impl StandardStream for ProcessOutput {
    async fn attach_to_handle(&mut self) -> Result<OwnedFd> {
        Ok(self.open_handle().await?.into_fd())
    }

    async fn attach_to_pipe_or_handle(&mut self) -> Result<PipeOrHandle> {
        self.open_handle().await
    }

    async fn detach(&mut self) -> Result<()> {
        if let Err(e) = self.teardown().await {
            warn!(error = %e, sink = ?self.target, "output pump failed during detach");
        }
        Ok(())
    }
}

struct FileBridge {
    consumer: Arc<dyn DataConsumer>,
    pump: PumpSlot,
    started: AtomicBool,
    config: StreamConfig,
}

/// A file path standing in for an output, for APIs that only accept paths
pub struct FileOutputProvider {
    path: PathBuf,
    bridge: Option<FileBridge>,
}

impl fmt::Debug for FileOutputProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileOutputProvider")
            .field("path", &self.path)
            .field("bridged", &self.bridge.is_some())
            .finish()
    }
}

impl FileOutputProvider {
    fn direct(path: PathBuf) -> Self {
        Self { path, bridge: None }
    }

    /// The path to write to
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Whether bytes written to the path are forwarded by a pump
    pub fn is_bridged(&self) -> bool {
        self.bridge.is_some()
    }

    /// Call once the path has started being written to.
    ///
    /// A bridged provider tails its file once; a second call fails with
    /// [`Error::AlreadyAttached`], even after [`FileOutputProvider::stop_reading`].
    pub async fn start_reading(&self) -> Result<()> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };
        let mut slot = bridge.pump.lock().await;
        if bridge.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyAttached);
        }
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::sink_unavailable(self.path.display().to_string(), e))?;
        let reader: BoxedReader = Box::new(file);
        *slot = Some(PumpTask::spawn(
            "scratch file",
            reader,
            Box::new(ConsumerSink(bridge.consumer.clone())),
            PumpMode::Follow {
                poll_interval: bridge.config.tail_poll_interval,
            },
            &bridge.config,
        ));
        Ok(())
    }

    /// Call once the path has stopped being written to.
    ///
    /// Forwards whatever is left in the file, then stops the pump.
    pub async fn stop_reading(&self) -> Result<()> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };
        let task = bridge.pump.lock().await.take();
        match task {
            Some(task) => task.stop().await.map(|_| ()),
            None => Ok(()),
        }
    }
}

enum StreamState {
    Pending(oneshot::Receiver<BoxedReader>),
    Ready(BoxedReader),
    Finished,
}

/// Readable side of an [`OutputTarget::InputStream`] output
pub struct LazyInputStream {
    state: StreamState,
}

impl fmt::Debug for LazyInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            StreamState::Pending(_) => "pending",
            StreamState::Ready(_) => "ready",
            StreamState::Finished => "finished",
        };
        f.debug_struct("LazyInputStream").field("state", &state).finish()
    }
}

impl LazyInputStream {
    fn new(rx: oneshot::Receiver<BoxedReader>) -> Self {
        Self {
            state: StreamState::Pending(rx),
        }
    }
}

impl AsyncRead for LazyInputStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            let next = match &mut this.state {
                StreamState::Pending(rx) => match ready!(Pin::new(rx).poll(cx)) {
                    Ok(reader) => StreamState::Ready(reader),
                    Err(_) => StreamState::Finished,
                },
                StreamState::Ready(reader) => return Pin::new(reader).poll_read(cx, buf),
                StreamState::Finished => return Poll::Ready(Ok(())),
            };
            this.state = next;
        }
    }
}
