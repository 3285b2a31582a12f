//! Types shared by process runners.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Runner-level failure. Exit codes and timeouts are not errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("process I/O failed: {0}")]
    Io(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A fully validated process invocation. Built only by the command executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment of the child; nothing is inherited.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    /// Cap applied to each of stdout and stderr.
    pub max_output_bytes: usize,
}

impl Invocation {
    /// `program args...` for log lines.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Raw result of running a process.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Either stream hit the output cap.
    pub truncated: bool,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Seam between the executor and the operating system.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, invocation: &Invocation) -> RuntimeResult<RawOutput>;
}
