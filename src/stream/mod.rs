//! Attachable standard streams
//!
//! [`ProcessOutput`] (stdout/stderr destinations) and [`ProcessInput`] (stdin
//! origins) share the [`StandardStream`] capability: attach exactly once to
//! obtain something a child process can inherit, detach any number of times.
//!
//! When the representation a process needs differs from the native one of the
//! stream (an OS pipe in front of a logger, a scratch file in front of a
//! buffer, ...), a pump task copies bytes across in the background. Detach
//! drains and joins it.

mod input;
mod output;
mod pump;


pub use input::{InputConsumer, InputKind, InputWriter, ProcessInput};
pub use output::{FileOutputProvider, LazyInputStream, OutputTarget, ProcessOutput};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::os::fd::OwnedFd;
use std::process::Stdio;

/// Path of the null device
pub const NULL_DEVICE: &str = "/dev/null";

/// Lifecycle of a stream attachment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttachState {
    /// Fresh, nothing acquired yet
    #[default]
    Unattached,
    /// Materialized once; OS resources are held
    Attached,
    /// Torn down
    Detached,
}

impl AttachState {
    /// Move to `Attached`, failing unless currently `Unattached`.
    ///
    /// The transition happens before any resource is acquired, so a failed
    /// first attach still consumes the single attach.
    pub(crate) fn begin_attach(&mut self) -> Result<()> {
        match self {
            AttachState::Unattached => {
                *self = AttachState::Attached;
                Ok(())
            }
            AttachState::Attached | AttachState::Detached => Err(Error::AlreadyAttached),
        }
    }

    /// Move to `Detached`, returning whether this call did the transition
    pub(crate) fn begin_detach(&mut self) -> bool {
        let first = *self != AttachState::Detached;
        *self = AttachState::Detached;
        first
    }
}

/// What a stream hands to a process when attached
#[derive(Debug)]
pub enum PipeOrHandle {
    /// The child's end of an OS pipe; the other end belongs to the stream
    Pipe(OwnedFd),
    /// An opened file or device
    Handle(OwnedFd),
}

impl PipeOrHandle {
    /// Whether this is a pipe end
    pub fn is_pipe(&self) -> bool {
        matches!(self, PipeOrHandle::Pipe(_))
    }

    /// The underlying descriptor
    pub fn into_fd(self) -> OwnedFd {
        match self {
            PipeOrHandle::Pipe(fd) | PipeOrHandle::Handle(fd) => fd,
        }
    }
}

impl From<PipeOrHandle> for Stdio {
    fn from(value: PipeOrHandle) -> Self {
        Stdio::from(value.into_fd())
    }
}

/// Capability shared by every stdio sink and source
#[async_trait]
pub trait StandardStream: Send {
    /// Attach and return a raw descriptor for the process side.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyAttached`] on any call after the first, otherwise the
    /// error of acquiring the resource.
    async fn attach_to_handle(&mut self) -> Result<OwnedFd>;

    /// Attach and return a pipe end where the stream's consumer can take one,
    /// or a file handle where it cannot.
    async fn attach_to_pipe_or_handle(&mut self) -> Result<PipeOrHandle>;

    /// Tear down: stop and join pump tasks, close descriptors.
    ///
    /// Always succeeds, including before attach and on repeated calls.
    async fn detach(&mut self) -> Result<()>;
}
