//! Archive extraction and creation through external tools
//!
//! [`ArchiveOperations`] sniffs archive signatures and shells out to `unzip`,
//! `tar` and `gzip`. Tool stdout goes to the configured [`Logger`] line by
//! line; stderr is captured so a failing tool reports why.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::{Config, TarCompression};
use crate::consumer::SharedBuffer;
use crate::error::{Error, Result};
use crate::logger::{Logger, TracingLogger};
use crate::process::{Process, ProcessBuilder};
use crate::signature::{SignatureKind, classify_file};
use crate::stream::{LazyInputStream, ProcessInput, ProcessOutput};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Progress of a single archive operation, reported in debug events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArchivePhase {
    Sniffing,
    ExtractingZip,
    ExtractingTar,
    Generating,
    Completed,
    Failed,
}

/// Resolved executables for the external tools
#[derive(Clone, Debug)]
struct ToolPaths {
    tar: PathBuf,
    unzip: PathBuf,
    gzip: PathBuf,
}

impl ToolPaths {
    fn resolve(config: &Config) -> Self {
        let tools = &config.tools;
        Self {
            tar: resolve_tool(tools.tar_path.as_ref(), "tar", tools.search_path),
            unzip: resolve_tool(tools.unzip_path.as_ref(), "unzip", tools.search_path),
            gzip: resolve_tool(tools.gzip_path.as_ref(), "gzip", tools.search_path),
        }
    }
}

/// Explicit path first, then PATH lookup, then the bare name
fn resolve_tool(explicit: Option<&PathBuf>, name: &str, search_path: bool) -> PathBuf {
    if let Some(path) = explicit {
        return path.clone();
    }
    if search_path && let Ok(found) = which::which(name) {
        return found;
    }
    debug!(tool = name, "tool not found on PATH, relying on the bare name");
    PathBuf::from(name)
}

/// A tool producing an archive on its stdout.
///
/// The tool is already running. Read `stream` while awaiting
/// [`Process::completed`]: a tool writing more than a pipe buffer blocks
/// until its output is consumed.
#[derive(Debug)]
pub struct GeneratedArchive {
    /// The running tool
    pub process: Process,
    /// The tool's stdout
    pub stream: LazyInputStream,
}

impl GeneratedArchive {
    /// Read the whole archive while waiting for the tool to exit
    pub async fn collect(self) -> Result<Vec<u8>> {
        let GeneratedArchive {
            process,
            mut stream,
        } = self;
        let tool = process.tool().to_string();
        let mut bytes = Vec::new();
        let (read, completed) = tokio::join!(stream.read_to_end(&mut bytes), process.completed());
        completed?;
        read.map_err(|e| Error::io_failure(format!("reading output of {}", tool), e))?;
        Ok(bytes)
    }
}

/// Extract and create archives with `tar`, `unzip` and `gzip`
///
/// # Examples
///
/// ```no_run
/// use procpipe::{ArchiveOperations, Config, TracingLogger};
/// use std::path::Path;
///
/// # async fn example() -> procpipe::Result<()> {
/// let ops = ArchiveOperations::new(Config::default(), TracingLogger::shared("archive"))?;
/// let dest = ops
///     .extract_archive(Path::new("bundle.zip"), Path::new("/tmp/bundle"))
///     .await?;
/// println!("extracted into {}", dest.display());
/// # Ok(())
/// # }
/// ```
pub struct ArchiveOperations {
    tools: ToolPaths,
    config: Config,
    logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for ArchiveOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveOperations")
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish()
    }
}

impl ArchiveOperations {
    /// Validate `config` and resolve the tool paths
    pub fn new(config: Config, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        let tools = ToolPaths::resolve(&config);
        debug!(?tools, "archive tools resolved");
        Ok(Self {
            tools,
            config,
            logger,
        })
    }

    /// Default configuration, logging tool output through `tracing`
    pub fn with_defaults() -> Result<Self> {
        Self::new(Config::default(), TracingLogger::shared("archive"))
    }

    /// The configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Extract `path` into `extract_path`, choosing the tool from the file's signature.
    ///
    /// Zip-family archives go to `unzip`, tar (plain or gzip) to `tar`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedFormat`] when the signature is not recognised,
    /// including missing and empty files. No tool is started in that case.
    pub async fn extract_archive(&self, path: &Path, extract_path: &Path) -> Result<PathBuf> {
        debug!(phase = ?ArchivePhase::Sniffing, path = %path.display(), "sniffing archive");
        match sniff(path).await {
            SignatureKind::ZipFamily => self.extract_zip_archive(path, extract_path).await,
            SignatureKind::Tar => self.extract_tar_archive(path, extract_path).await,
            SignatureKind::Unknown => {
                warn!(phase = ?ArchivePhase::Failed, path = %path.display(), "unrecognised archive signature");
                Err(Error::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        }
    }

    /// Extract a zip archive with `unzip`, without sniffing
    pub async fn extract_zip_archive(&self, path: &Path, extract_path: &Path) -> Result<PathBuf> {
        let overwrite = if self.config.archive.overwrite { "-o" } else { "-n" };
        let args: Vec<OsString> = vec![
            overwrite.into(),
            path.into(),
            "-d".into(),
            extract_path.into(),
        ];
        self.run_extraction(&self.tools.unzip, args, None, extract_path, ArchivePhase::ExtractingZip)
            .await
    }

    /// Extract a tar archive (compression detected by tar) without sniffing
    pub async fn extract_tar_archive(&self, path: &Path, extract_path: &Path) -> Result<PathBuf> {
        let args: Vec<OsString> = vec![
            "-C".into(),
            extract_path.into(),
            "-x".into(),
            "-p".into(),
            "-f".into(),
            path.into(),
        ];
        self.run_extraction(&self.tools.tar, args, None, extract_path, ArchivePhase::ExtractingTar)
            .await
    }

    /// Extract a tar archive read from `input`.
    ///
    /// The input becomes tar's stdin; no signature is sniffed. Whether the
    /// stream is gzip-compressed comes from
    /// [`ArchiveConfig::stream_compression`](crate::config::ArchiveConfig::stream_compression).
    pub async fn extract_tar_archive_from_stream(
        &self,
        input: ProcessInput,
        extract_path: &Path,
    ) -> Result<PathBuf> {
        let mut args: Vec<OsString> = vec!["-C".into(), extract_path.into(), "-x".into()];
        if self.config.archive.stream_compression == TarCompression::Gzip {
            args.push("-z".into());
        }
        for arg in ["-p", "-f", "-"] {
            args.push(arg.into());
        }
        self.run_extraction(
            &self.tools.tar,
            args,
            Some(input),
            extract_path,
            ArchivePhase::ExtractingTar,
        )
        .await
    }

    /// Gzip a single file, streaming the compressed bytes
    pub async fn gzip_path(&self, path: &Path) -> Result<GeneratedArchive> {
        let args: Vec<OsString> = vec!["-c".into(), path.into()];
        self.generate(&self.tools.gzip, args, path).await
    }

    /// Create an uncompressed tar of `path`, streaming the archive bytes.
    ///
    /// Entries are stored relative to the parent of `path`, so the archive
    /// holds a single top-level entry named after it.
    pub async fn create_tar_for_path(&self, path: &Path) -> Result<GeneratedArchive> {
        let (directory, entry): (&Path, OsString) = match path.file_name() {
            Some(name) => {
                let parent = path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                (parent, name.to_os_string())
            }
            // `/`, `..` and the like: archive the contents instead
            None => (path, OsString::from(".")),
        };
        let args: Vec<OsString> = vec![
            "-c".into(),
            "-f".into(),
            "-".into(),
            "-C".into(),
            directory.into(),
            entry,
        ];
        self.generate(&self.tools.tar, args, path).await
    }

    fn stdout_to_logger(&self) -> ProcessOutput {
        ProcessOutput::logger(self.logger.clone()).with_config(self.config.streams.clone())
    }

    fn captured_stderr(&self) -> ProcessOutput {
        ProcessOutput::buffer(SharedBuffer::new()).with_config(self.config.streams.clone())
    }

    async fn run_extraction(
        &self,
        tool: &Path,
        args: Vec<OsString>,
        stdin: Option<ProcessInput>,
        extract_path: &Path,
        phase: ArchivePhase,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(extract_path).await?;
        info!(?phase, tool = %tool.display(), dest = %extract_path.display(), "extracting archive");

        let mut builder = ProcessBuilder::new(tool)
            .args(args)
            .stdout(self.stdout_to_logger())
            .stderr(self.captured_stderr());
        if let Some(input) = stdin {
            builder = builder.stdin(input);
        }

        match builder.start().await?.completed().await {
            Ok(_) => {
                info!(phase = ?ArchivePhase::Completed, dest = %extract_path.display(), "extraction finished");
                Ok(extract_path.to_path_buf())
            }
            Err(e) => {
                warn!(phase = ?ArchivePhase::Failed, error = %e, "extraction failed");
                Err(e)
            }
        }
    }

    async fn generate(
        &self,
        tool: &Path,
        args: Vec<OsString>,
        source: &Path,
    ) -> Result<GeneratedArchive> {
        let (stdout, stream) = ProcessOutput::input_stream();
        let process = ProcessBuilder::new(tool)
            .args(args)
            .stdout(stdout.with_config(self.config.streams.clone()))
            .stderr(self.captured_stderr())
            .start()
            .await?;
        info!(
            phase = ?ArchivePhase::Generating,
            tool = process.tool(),
            pid = process.pid(),
            source = %source.display(),
            "streaming archive"
        );
        Ok(GeneratedArchive { process, stream })
    }
}

async fn sniff(path: &Path) -> SignatureKind {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || classify_file(&owned))
        .await
        .unwrap_or_default()
}
