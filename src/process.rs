//! Spawning external tools with attached standard streams
//!
//! [`ProcessBuilder`] wires a [`ProcessInput`] and two [`ProcessOutput`]s into
//! a `tokio::process::Command`. [`Process::completed`] waits for the exit,
//! tears the streams down and turns a rejected exit code into
//! [`Error::UnderlyingToolFailure`].

use crate::consumer::SharedBuffer;
use crate::error::{Error, Result};
use crate::stream::{ProcessInput, ProcessOutput, StandardStream};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Configures and starts an external process
#[derive(Debug)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    stdin: Option<ProcessInput>,
    stdout: ProcessOutput,
    stderr: ProcessOutput,
    accepted_exit_codes: Vec<i32>,
}

impl ProcessBuilder {
    /// Start building a process for `program`.
    ///
    /// Defaults: no stdin, stdout to `/dev/null`, stderr captured into a
    /// buffer (so failures can report it), only exit code 0 accepted.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdin: None,
            stdout: ProcessOutput::null_device(),
            stderr: ProcessOutput::buffer(SharedBuffer::new()),
            accepted_exit_codes: vec![0],
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory of the process
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Standard input origin (default: none, the process reads EOF)
    pub fn stdin(mut self, input: ProcessInput) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Standard output destination
    pub fn stdout(mut self, output: ProcessOutput) -> Self {
        self.stdout = output;
        self
    }

    /// Standard error destination
    pub fn stderr(mut self, output: ProcessOutput) -> Self {
        self.stderr = output;
        self
    }

    /// Exit codes treated as success
    pub fn accepted_exit_codes(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.accepted_exit_codes = codes.into();
        self
    }

    /// The program to run
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Attach the streams and spawn the process.
    ///
    /// # Errors
    ///
    /// - Any attach error of the three streams
    /// - [`Error::ExternalTool`] if the program cannot be executed
    ///
    /// On failure every stream that was already attached is detached again.
    pub async fn start(self) -> Result<Process> {
        let ProcessBuilder {
            program,
            args,
            current_dir,
            mut stdin,
            mut stdout,
            mut stderr,
            accepted_exit_codes,
        } = self;
        let tool = tool_name(&program);

        let mut command = Command::new(&program);
        command.args(&args).kill_on_drop(true);
        if let Some(dir) = &current_dir {
            command.current_dir(dir);
        }

        let spawned = match wire_streams(&mut command, stdin.as_mut(), &mut stdout, &mut stderr)
            .await
        {
            Ok(()) => command
                .spawn()
                .map_err(|e| Error::ExternalTool(format!("Failed to execute {}: {}", tool, e))),
            Err(e) => Err(e),
        };
        // Closes the parent's copies of the child's pipe ends.
        drop(command);

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(tool = %tool, error = %e, "failed to start process");
                if let Some(input) = stdin.as_mut() {
                    input.detach().await?;
                }
                stdout.detach().await?;
                stderr.detach().await?;
                return Err(e);
            }
        };

        let pid = child.id();
        info!(tool = %tool, pid, "process started");
        debug!(tool = %tool, ?args, ?current_dir, "process arguments");

        Ok(Process {
            tool,
            child,
            pid,
            stdin,
            stdout,
            stderr,
            accepted_exit_codes,
        })
    }
}

async fn wire_streams(
    command: &mut Command,
    stdin: Option<&mut ProcessInput>,
    stdout: &mut ProcessOutput,
    stderr: &mut ProcessOutput,
) -> Result<()> {
    match stdin {
        Some(input) => {
            command.stdin(Stdio::from(input.attach_to_pipe_or_handle().await?));
        }
        None => {
            command.stdin(Stdio::null());
        }
    }
    command.stdout(Stdio::from(stdout.attach_to_pipe_or_handle().await?));
    command.stderr(Stdio::from(stderr.attach_to_pipe_or_handle().await?));
    Ok(())
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// A running process with its attached streams
#[derive(Debug)]
pub struct Process {
    tool: String,
    child: Child,
    pid: Option<u32>,
    stdin: Option<ProcessInput>,
    stdout: ProcessOutput,
    stderr: ProcessOutput,
    accepted_exit_codes: Vec<i32>,
}

impl Process {
    /// Name of the running program
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// OS process id, `None` once the process has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The stdout destination
    pub fn stdout(&self) -> &ProcessOutput {
        &self.stdout
    }

    /// The stderr destination
    pub fn stderr(&self) -> &ProcessOutput {
        &self.stderr
    }

    /// Send SIGKILL. [`Process::completed`] then reports the termination.
    pub fn kill(&mut self) -> Result<()> {
        debug!(tool = %self.tool, pid = self.pid, "killing process");
        self.child.start_kill()?;
        Ok(())
    }

    /// Wait for the process to exit, then detach its streams.
    ///
    /// stdin is detached (a tool may legitimately stop reading early);
    /// stdout and stderr are drained and finished so a copy failure is
    /// reported rather than leaving truncated output behind.
    ///
    /// # Errors
    ///
    /// - [`Error::UnderlyingToolFailure`] when the exit code is not accepted or
    ///   the process was killed by a signal
    /// - [`Error::IoFailure`] when forwarding stdout or stderr failed
    pub async fn completed(mut self) -> Result<ProcessOutcome> {
        let status = self.child.wait().await;

        if let Some(input) = self.stdin.as_mut() {
            input.detach().await?;
        }
        let stdout_result = self.stdout.finish().await;
        let stderr_result = self.stderr.finish().await;

        let status =
            status.map_err(|e| Error::io_failure(format!("waiting for {}", self.tool), e))?;
        let exit_code = match status.code() {
            Some(code) if self.accepted_exit_codes.contains(&code) => code,
            code => {
                let stderr = self
                    .stderr
                    .captured_text()
                    .map(|text| text.trim_end().to_string())
                    .unwrap_or_default();
                warn!(tool = %self.tool, pid = self.pid, exit_code = ?code, "process failed");
                return Err(Error::UnderlyingToolFailure {
                    tool: self.tool,
                    exit_code: code,
                    stderr,
                });
            }
        };
        stdout_result?;
        stderr_result?;

        info!(tool = %self.tool, pid = self.pid, exit_code, "process completed");
        Ok(ProcessOutcome {
            exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Result of a process that exited with an accepted code
#[derive(Debug)]
pub struct ProcessOutcome {
    /// The accepted exit code
    pub exit_code: i32,
    /// The detached stdout destination
    pub stdout: ProcessOutput,
    /// The detached stderr destination
    pub stderr: ProcessOutput,
}
