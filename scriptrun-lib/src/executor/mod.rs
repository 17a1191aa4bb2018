pub mod runner;

pub use runner::ProcessExecutor;

use crate::pack::Pack;
use anyhow::Result;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GenericError = 1,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot read script {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("compilation failed{}: {stderr}", exit_suffix(.code))]
    Compile { code: Option<i32>, stderr: String },

    #[error("script exited with status {code}")]
    Run { code: i32 },
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|code| format!(" (exit {code})")).unwrap_or_default()
}

/// What running a script produced. The compile and run phases fail
/// independently; at most one of them is reported.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Success,
    CompileFailed(ScriptError),
    RunFailed(ScriptError),
}

/// Compiles and runs scripts. `initialize` must precede `execute`, and
/// `terminate` releases whatever `initialize` set up.
pub trait ScriptExecutor {
    fn initialize(&mut self, references: &[PathBuf], packs: Vec<Pack>) -> Result<()>;

    /// `Ok(None)` means the executor could not produce an outcome at all.
    fn execute(&mut self, script: &Path, args: &[String]) -> Result<Option<ExecutionOutcome>>;

    fn terminate(&mut self) -> Result<()>;
}
