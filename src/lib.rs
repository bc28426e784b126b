//! # procpipe
//!
//! Swappable destinations and sources for the standard streams of external
//! processes, and archive operations built on top of them.
//!
//! ## Design Philosophy
//!
//! procpipe is designed to be:
//! - **Attach once, detach freely** - A stream hands out its OS resource exactly once; teardown is idempotent
//! - **Representation-agnostic** - Any sink can be handed to a process as a descriptor, a file path or a push consumer
//! - **Tool-driven** - Archives are handled by `tar`, `unzip` and `gzip`; the crate only sniffs signatures
//! - **Library-first** - No CLI, no subscriber; log events go through `tracing`
//!
//! ## Quick Start
//!
//! ```no_run
//! use procpipe::{ProcessBuilder, ProcessInput, ProcessOutput, SharedBuffer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let captured = SharedBuffer::new();
//!
//!     let outcome = ProcessBuilder::new("cat")
//!         .stdin(ProcessInput::from_bytes(b"hello".to_vec()))
//!         .stdout(ProcessOutput::buffer(captured.clone()))
//!         .start()
//!         .await?
//!         .completed()
//!         .await?;
//!
//!     assert_eq!(outcome.exit_code, 0);
//!     assert_eq!(captured.snapshot(), b"hello");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive extraction and creation
pub mod archive;
/// Configuration types
pub mod config;
/// Push-style byte consumers
pub mod consumer;
/// Error types
pub mod error;
/// Line-oriented logging collaborator
pub mod logger;
/// Spawning external tools with attached streams
pub mod process;
/// Archive signature sniffing
pub mod signature;
/// Attachable stdin/stdout/stderr streams
pub mod stream;

// Re-export commonly used types
pub use archive::{ArchiveOperations, GeneratedArchive};
pub use config::{ArchiveConfig, Config, StreamConfig, TarCompression, ToolsConfig};
pub use consumer::{DataConsumer, DiscardConsumer, FileConsumer, LineLogConsumer, SharedBuffer};
pub use error::{Error, Result};
pub use logger::{Logger, TracingLogger};
pub use process::{Process, ProcessBuilder, ProcessOutcome};
pub use signature::{SignatureKind, classify, classify_file};
pub use stream::{
    AttachState, FileOutputProvider, InputConsumer, InputKind, InputWriter, LazyInputStream,
    OutputTarget, PipeOrHandle, ProcessInput, ProcessOutput, StandardStream,
};
