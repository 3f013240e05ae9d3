//! Test doubles for pipelines and the engine.
//!
//! Compiled for this crate's tests and for dependents that enable the
//! `test-util` feature.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};

use crate::executor::{ExecutorError, ProcessRunner, ToolCommand, ToolOutput};

/// Default size of synthetic tool output.
pub const DEFAULT_OUTPUT_DIMS: (u32, u32) = (64, 48);

#[derive(Debug, Clone)]
struct OutputRule {
    program: String,
    arg_prefix: String,
    dims: (u32, u32),
}

#[derive(Debug, Clone)]
struct FailRule {
    program: String,
    arg_needle: Option<String>,
}

/// A [`ProcessRunner`] that never spawns anything.
///
/// Every invocation is recorded. Invocations that declare an output file get
/// a synthetic PNG written there, unless a rule makes the program missing,
/// failing, or timing out.
#[derive(Debug, Default)]
pub struct FakeRunner {
    missing: HashSet<String>,
    timeouts: HashSet<String>,
    failures: Vec<FailRule>,
    empty_outputs: HashSet<String>,
    corrupt_outputs: HashSet<String>,
    outputs: Vec<OutputRule>,
    stdout: HashMap<String, String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ToolCommand>>,
}

impl FakeRunner {
    /// A runner where every program exists and succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// `program` is not installed.
    pub fn missing(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    /// Every invocation of `program` exits non-zero.
    pub fn failing(mut self, program: &str) -> Self {
        self.failures.push(FailRule {
            program: program.to_string(),
            arg_needle: None,
        });
        self
    }

    /// Invocations of `program` with an argument containing `needle` exit non-zero.
    pub fn failing_with_arg(mut self, program: &str, needle: &str) -> Self {
        self.failures.push(FailRule {
            program: program.to_string(),
            arg_needle: Some(needle.to_string()),
        });
        self
    }

    /// Every invocation of `program` times out.
    pub fn timing_out(mut self, program: &str) -> Self {
        self.timeouts.insert(program.to_string());
        self
    }

    /// `program` succeeds but writes a zero-length output.
    pub fn empty_output(mut self, program: &str) -> Self {
        self.empty_outputs.insert(program.to_string());
        self
    }

    /// `program` succeeds but writes bytes no decoder understands.
    pub fn corrupt_output(mut self, program: &str) -> Self {
        self.corrupt_outputs.insert(program.to_string());
        self
    }

    /// Outputs of `program` invocations with an argument starting with
    /// `arg_prefix` get the given dimensions.
    pub fn output_dims(mut self, program: &str, arg_prefix: &str, dims: (u32, u32)) -> Self {
        self.outputs.push(OutputRule {
            program: program.to_string(),
            arg_prefix: arg_prefix.to_string(),
            dims,
        });
        self
    }

    /// Standard output returned by `program`.
    pub fn stdout(mut self, program: &str, text: &str) -> Self {
        self.stdout.insert(program.to_string(), text.to_string());
        self
    }

    /// Sleep this long inside every invocation.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All recorded invocations.
    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Recorded invocations of `program`.
    pub fn calls_to(&self, program: &str) -> Vec<ToolCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    /// Number of recorded invocations of `program` that declared an output,
    /// i.e. real conversions rather than version probes.
    pub fn conversions_by(&self, program: &str) -> usize {
        self.calls_to(program)
            .iter()
            .filter(|c| c.output.is_some())
            .count()
    }

    /// Forget recorded invocations.
    pub fn reset_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn dims_for(&self, cmd: &ToolCommand) -> (u32, u32) {
        self.outputs
            .iter()
            .find(|rule| {
                rule.program == cmd.program
                    && cmd.args.iter().any(|a| a.starts_with(&rule.arg_prefix))
            })
            .map(|rule| rule.dims)
            .unwrap_or(DEFAULT_OUTPUT_DIMS)
    }

    fn should_fail(&self, cmd: &ToolCommand) -> bool {
        self.failures.iter().any(|rule| {
            rule.program == cmd.program
                && rule
                    .arg_needle
                    .as_ref()
                    .is_none_or(|needle| cmd.args.iter().any(|a| a.contains(needle.as_str())))
        })
    }
}

/// Write a synthetic gradient PNG.
pub fn write_test_png(path: &Path, width: u32, height: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    img.save_with_format(path, ImageFormat::Png)
        .map_err(std::io::Error::other)
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ExecutorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.missing.contains(&command.program) {
            return Err(ExecutorError::CommandNotFound(command.program.clone()));
        }
        if self.timeouts.contains(&command.program) {
            return Err(ExecutorError::Timeout(command.timeout.as_secs()));
        }
        if self.should_fail(command) {
            return Err(ExecutorError::ProcessFailed {
                code: 1,
                stderr: format!("{} failed (fake)", command.program),
            });
        }

        if let Some(output) = &command.output {
            if self.empty_outputs.contains(&command.program) {
                std::fs::write(output, b"")?;
            } else if self.corrupt_outputs.contains(&command.program) {
                std::fs::write(output, b"corrupt raster data")?;
            } else {
                let (w, h) = self.dims_for(command);
                write_test_png(output, w, h)?;
            }
        }

        Ok(ToolOutput {
            stdout: self.stdout.get(&command.program).cloned().unwrap_or_default(),
            stderr: String::new(),
            duration_ms: 0,
        })
    }
}
