//! External tool execution.
//!
//! Every conversion tool runs as a child process under a hard timeout and is
//! killed when the timeout fires. Pipelines only talk to [`ProcessRunner`],
//! so tests can substitute a fake.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The program could not be found
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// The process exceeded its timeout and was killed
    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    /// The process exited with a non-zero code
    #[error("Command failed with exit code {code}: {stderr}")]
    ProcessFailed {
        /// The exit code (-1 when killed by a signal)
        code: i32,
        /// Standard error output, truncated
        stderr: String,
    },

    /// IO error while spawning or waiting
    #[error("IO error while running command: {0}")]
    Io(#[from] std::io::Error),
}

/// A single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Hard timeout
    pub timeout: Duration,
    /// File the invocation is expected to produce, if any
    pub output: Option<PathBuf>,
}

impl ToolCommand {
    /// Create a command with no arguments.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            output: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn arg_path(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    /// Declare the file this invocation writes.
    pub fn expect_output(mut self, path: &Path) -> Self {
        self.output = Some(path.to_path_buf());
        self
    }

    /// Whether any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

/// Captured output of a finished invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Runs external tools.
#[async_trait]
pub trait ProcessRunner: Send + Sync + std::fmt::Debug + 'static {
    /// Run a command to completion or timeout.
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ExecutorError>;
}

/// Runs tools as real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a runner.
    pub fn new() -> Self {
        Self
    }
}

/// Longest stderr excerpt kept in errors.
const STDERR_LIMIT: usize = 2000;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ExecutorError> {
        let start = Instant::now();

        tracing::debug!(tool = %command.program, args = ?command.args, "Running tool");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExecutorError::CommandNotFound(command.program.clone()));
            }
            Err(e) => return Err(ExecutorError::Io(e)),
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let result = tokio::time::timeout(command.timeout, child.wait_with_output()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                if !output.status.success() {
                    let code = output.status.code().unwrap_or(-1);
                    tracing::debug!(
                        tool = %command.program,
                        code,
                        duration_ms,
                        stderr = %stderr.chars().take(500).collect::<String>(),
                        "Tool exited with failure"
                    );
                    return Err(ExecutorError::ProcessFailed {
                        code,
                        stderr: stderr.chars().take(STDERR_LIMIT).collect(),
                    });
                }

                tracing::debug!(tool = %command.program, duration_ms, "Tool finished");

                Ok(ToolOutput {
                    stdout,
                    stderr,
                    duration_ms,
                })
            }
            Ok(Err(e)) => Err(ExecutorError::Io(e)),
            Err(_) => {
                tracing::warn!(
                    tool = %command.program,
                    timeout_secs = command.timeout.as_secs(),
                    "Tool timed out and was killed"
                );
                Err(ExecutorError::Timeout(command.timeout.as_secs()))
            }
        }
    }
}
