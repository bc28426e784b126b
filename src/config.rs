//! Configuration types for procpipe

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// External tool paths (tar, unzip, gzip)
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to tar executable (auto-detected if None)
    #[serde(default)]
    pub tar_path: Option<PathBuf>,

    /// Path to unzip executable (auto-detected if None)
    #[serde(default)]
    pub unzip_path: Option<PathBuf>,

    /// Path to gzip executable (auto-detected if None)
    #[serde(default)]
    pub gzip_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tar_path: None,
            unzip_path: None,
            gzip_path: None,
            search_path: true,
        }
    }
}

/// Tuning for stream attachment and pump tasks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Directory for scratch files used to bridge path-only APIs (None = system temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Size of a single pump read, also the buffer size of stream inputs (default: 64 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// How often a file-tailing pump re-checks a scratch file at EOF (default: 50ms)
    #[serde(default = "default_tail_poll_interval")]
    pub tail_poll_interval: Duration,

    /// How long a detached pump waits for more bytes before giving up on draining (default: 250ms)
    ///
    /// Detach drains whatever the source still yields and stops at EOF. A source whose
    /// writer stays open would never reach EOF, so draining also stops once no byte has
    /// arrived for this long.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            chunk_size: default_chunk_size(),
            tail_poll_interval: default_tail_poll_interval(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl StreamConfig {
    pub(crate) fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Compression applied to tar archives read from a stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TarCompression {
    /// Plain tar
    None,
    /// gzip-compressed tar (default)
    #[default]
    Gzip,
}

/// Archive operation behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Compression of tar streams passed to `extract_tar_archive_from_stream`
    #[serde(default)]
    pub stream_compression: TarCompression,

    /// Overwrite existing files when unzipping (default: true)
    #[serde(default = "default_true")]
    pub overwrite: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            stream_compression: TarCompression::default(),
            overwrite: true,
        }
    }
}

/// Main configuration for procpipe
///
/// Tool paths are flattened, so a config file reads
/// `{"tar_path": "/usr/bin/tar", "streams": {...}, "archive": {...}}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// External tool paths
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Stream and pump tuning
    #[serde(default)]
    pub streams: StreamConfig,

    /// Archive operation behaviour
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Config {
    /// Check the configuration for values that would make the streams unusable
    pub fn validate(&self) -> Result<()> {
        if self.streams.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be greater than zero".to_string(),
                key: Some("chunk_size".to_string()),
            });
        }
        if self.streams.tail_poll_interval.is_zero() {
            return Err(Error::Config {
                message: "tail_poll_interval must be greater than zero".to_string(),
                key: Some("tail_poll_interval".to_string()),
            });
        }
        if let Some(dir) = &self.streams.scratch_dir
            && !dir.is_dir()
        {
            return Err(Error::Config {
                message: format!("scratch_dir {} is not a directory", dir.display()),
                key: Some("scratch_dir".to_string()),
            });
        }
        Ok(())
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_tail_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_drain_timeout() -> Duration {
    Duration::from_millis(250)
}
