//! External flash invoker.
//!
//! The actual firmware write is done by an external tool that takes over the
//! serial port while no [`LinkSession`](crate::passthrough::LinkSession)
//! holds it. Only the tool's exit status is observed.

pub mod esptool;
pub mod job;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use esptool::Esptool;
pub use job::{DEFAULT_FLASH_BAUD, FlashJob, TargetChip};

/// A fully built command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<OsString>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_word(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", shell_word(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn shell_word(word: &str) -> String {
    if word.is_empty() || word.contains(char::is_whitespace) {
        format!("\"{word}\"")
    } else {
        word.to_string()
    }
}

/// How the tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    code: Option<i32>,
}

impl ToolExit {
    /// From a raw exit code; `None` means killed by a signal.
    pub fn from_code(code: Option<i32>) -> Self {
        Self { code }
    }

    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Zero exit status.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ToolExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self::from_code(status.code())
    }
}

/// Capability to run an external flash tool.
pub trait FlashTool {
    /// Resolve the tool executable. Called before any port is opened.
    fn locate(&self) -> Result<PathBuf>;

    /// Build the command line that writes `job` with `program`.
    fn build_invocation(&self, program: &Path, job: &FlashJob) -> Invocation;

    /// Run to completion, streaming output to the terminal.
    ///
    /// An `Err` means the process could not be started.
    fn run(&mut self, invocation: &Invocation) -> Result<ToolExit>;
}
