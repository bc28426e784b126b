//! Error types for procpipe
//!
//! Every failure of a stream attachment, pump task, spawned tool or archive
//! operation surfaces through [`Error`]. Teardown (`detach`) never produces
//! one.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for procpipe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for procpipe
#[derive(Debug, Error)]
pub enum Error {
    /// A stream was attached (or materialized) more than once
    #[error("stream is already attached")]
    AlreadyAttached,

    /// Bytes were written to an input source that has already signalled EOF
    #[error("input source is already closed")]
    SourceAlreadyClosed,

    /// The destination of an output sink could not be created or opened
    #[error("sink unavailable ({target}): {reason}")]
    SinkUnavailable {
        /// Description of the destination (a path, "pipe", "/dev/null", ...)
        target: String,
        /// Why the destination could not be created
        reason: String,
    },

    /// The archive signature could not be recognised
    #[error("unsupported archive format: {path}")]
    UnsupportedFormat {
        /// The archive whose header was sniffed
        path: PathBuf,
    },

    /// An external tool exited with a status that was not accepted
    #[error("{tool} failed with exit code {exit_code:?}: {stderr}")]
    UnderlyingToolFailure {
        /// The program that was run
        tool: String,
        /// Exit code, `None` when the process was terminated by a signal
        exit_code: Option<i32>,
        /// Captured standard error, empty if stderr was not captured
        stderr: String,
    },

    /// A pump task hit a read or write error while copying bytes
    #[error("I/O failure while {context}: {source}")]
    IoFailure {
        /// What the pump was doing
        context: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External tool could not be executed at all
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported by this stream variant
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },
}

impl Error {
    /// Machine-readable error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Error::AlreadyAttached => "already_attached",
            Error::SourceAlreadyClosed => "source_already_closed",
            Error::SinkUnavailable { .. } => "sink_unavailable",
            Error::UnsupportedFormat { .. } => "unsupported_format",
            Error::UnderlyingToolFailure { .. } => "underlying_tool_failure",
            Error::IoFailure { .. } => "io_failure",
            Error::Io(_) => "io_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::Config { .. } => "config_error",
        }
    }

    pub(crate) fn sink_unavailable(target: impl Into<String>, reason: impl ToString) -> Self {
        Error::SinkUnavailable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io_failure(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::IoFailure {
            context: context.into(),
            source,
        }
    }
}
