//! Push-style byte consumers
//!
//! A [`DataConsumer`] receives chunks synchronously and is told once when the
//! data ends. Every output sink can be materialized as one, and the pump tasks
//! forward into them.

use crate::logger::Logger;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Receives bytes pushed by a producer.
pub trait DataConsumer: Send + Sync {
    /// Consume a chunk of data
    fn consume(&self, data: &[u8]) -> io::Result<()>;

    /// Called once when no more data will arrive
    fn consume_end_of_file(&self) -> io::Result<()> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops everything it is given
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardConsumer;

impl DataConsumer for DiscardConsumer {
    fn consume(&self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Growable byte buffer owned by the caller and appended to by a sink.
///
/// Usage contract: at most one sink writes into a given buffer. Readers may
/// observe a partially appended chunk; there is no read-during-write atomicity.
#[derive(Debug, Default, Clone)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes
    pub fn append(&self, data: &[u8]) {
        lock(&self.inner).extend_from_slice(data);
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        lock(&self.inner).clone()
    }

    /// Current contents decoded as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&lock(&self.inner)).into_owned()
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles refer to the same underlying buffer
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl DataConsumer for SharedBuffer {
    fn consume(&self, data: &[u8]) -> io::Result<()> {
        self.append(data);
        Ok(())
    }
}

/// Splits a byte stream on `\n` and logs each complete line.
///
/// A trailing `\r` is stripped. A final line without newline is logged at EOF.
pub struct LineLogConsumer {
    logger: Arc<dyn Logger>,
    partial: Mutex<Vec<u8>>,
}

impl LineLogConsumer {
    /// Wrap a logger
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            partial: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        self.logger.log(&String::from_utf8_lossy(line));
    }
}

impl DataConsumer for LineLogConsumer {
    fn consume(&self, data: &[u8]) -> io::Result<()> {
        let mut partial = lock(&self.partial);
        partial.extend_from_slice(data);
        let mut start = 0;
        while let Some(pos) = partial[start..].iter().position(|b| *b == b'\n') {
            self.emit(&partial[start..start + pos]);
            start += pos + 1;
        }
        partial.drain(..start);
        Ok(())
    }

    fn consume_end_of_file(&self) -> io::Result<()> {
        let rest = std::mem::take(&mut *lock(&self.partial));
        if !rest.is_empty() {
            self.emit(&rest);
        }
        Ok(())
    }
}

/// Appends to a file opened once when the consumer is created
pub struct FileConsumer {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl FileConsumer {
    /// Create (or truncate) `path` and write consumed bytes to it
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    /// The file being written
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataConsumer for FileConsumer {
    fn consume(&self, data: &[u8]) -> io::Result<()> {
        match lock(&self.file).as_mut() {
            Some(file) => file.write_all(data),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{} is already closed", self.path.display()),
            )),
        }
    }

    fn consume_end_of_file(&self) -> io::Result<()> {
        match lock(&self.file).take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Forwards to an inner consumer, passing end-of-file on at most once.
pub(crate) struct EndOnce {
    inner: Arc<dyn DataConsumer>,
    ended: AtomicBool,
}

impl EndOnce {
    pub(crate) fn new(inner: Arc<dyn DataConsumer>) -> Self {
        Self {
            inner,
            ended: AtomicBool::new(false),
        }
    }
}

impl DataConsumer for EndOnce {
    fn consume(&self, data: &[u8]) -> io::Result<()> {
        self.inner.consume(data)
    }

    fn consume_end_of_file(&self) -> io::Result<()> {
        if self.ended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.consume_end_of_file()
    }
}

/// Feeds consumed chunks into a [`ChunkReader`]; EOF closes the reader.
pub(crate) struct ChunkFeeder {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ChunkFeeder {
    pub(crate) fn pair() -> (ChunkFeeder, ChunkReader) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChunkFeeder {
                tx: Mutex::new(Some(tx)),
            },
            ChunkReader::new(rx),
        )
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.tx).as_ref().is_none_or(|tx| tx.is_closed())
    }

    pub(crate) fn close(&self) {
        lock(&self.tx).take();
    }
}

impl DataConsumer for ChunkFeeder {
    fn consume(&self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let guard = lock(&self.tx);
        let sent = guard
            .as_ref()
            .map(|tx| tx.send(data.to_vec()).is_ok())
            .unwrap_or(false);
        if sent {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed"))
        }
    }

    fn consume_end_of_file(&self) -> io::Result<()> {
        self.close();
        Ok(())
    }
}

/// `AsyncRead` over a queue of chunks. Reads EOF once every sender is gone.
pub(crate) struct ChunkReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl ChunkReader {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.offset >= this.pending.len() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(chunk) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
                None => return Poll::Ready(Ok(())),
            }
        }
        let available = &this.pending[this.offset..];
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}
