use crate::assembly::{AssemblyNameReader, IndeterminatePolicy};
use crate::discovery::AssemblyDiscovery;
use crate::executor::{ExecutionOutcome, ExitCode, ScriptExecutor};
use crate::fs::FileSystem;
use crate::pack::{Pack, PackResolver};
use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    Error,
}

impl From<CommandResult> for ExitCode {
    fn from(result: CommandResult) -> Self {
        match result {
            CommandResult::Success => ExitCode::Success,
            CommandResult::Error => ExitCode::GenericError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub script: PathBuf,
    pub args: Vec<String>,
}

impl ScriptInvocation {
    pub fn new(script: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            script: script.into(),
            args,
        }
    }
}

/// Runs one script: discovers its assembly references, hands them to the
/// executor along with the resolved packs, and reduces the outcome to a
/// [`CommandResult`].
pub struct ExecuteScriptCommand<'a> {
    invocation: ScriptInvocation,
    file_system: &'a dyn FileSystem,
    executor: &'a mut dyn ScriptExecutor,
    pack_resolver: &'a dyn PackResolver,
    assembly_reader: &'a dyn AssemblyNameReader,
    policy: IndeterminatePolicy,
}

impl<'a> ExecuteScriptCommand<'a> {
    pub fn new(
        invocation: ScriptInvocation,
        file_system: &'a dyn FileSystem,
        executor: &'a mut dyn ScriptExecutor,
        pack_resolver: &'a dyn PackResolver,
        assembly_reader: &'a dyn AssemblyNameReader,
    ) -> Self {
        Self {
            invocation,
            file_system,
            executor,
            pack_resolver,
            assembly_reader,
            policy: IndeterminatePolicy::default(),
        }
    }

    pub fn with_indeterminate_policy(mut self, policy: IndeterminatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Never fails: every error is logged and reported as
    /// [`CommandResult::Error`].
    pub fn execute(&mut self) -> CommandResult {
        match self.run() {
            Ok(result) => result,
            Err(err) => {
                tracing::error!("{}", err);
                CommandResult::Error
            }
        }
    }

    fn run(&mut self) -> Result<CommandResult> {
        let references = match self.file_system.get_working_directory(&self.invocation.script)? {
            Some(working_directory) => {
                AssemblyDiscovery::with_policy(self.file_system, self.assembly_reader, self.policy)
                    .discover_assemblies(&working_directory)?
            }
            None => Vec::new(),
        };

        let packs = self.pack_resolver.get_packs()?;

        let mut session = ExecutorSession::new(&mut *self.executor);
        session.initialize(&references, packs)?;
        let outcome = session.execute(&self.invocation.script, &self.invocation.args)?;
        session.finish()?;

        Ok(classify(outcome))
    }
}

fn classify(outcome: Option<ExecutionOutcome>) -> CommandResult {
    match outcome {
        Some(ExecutionOutcome::Success) => CommandResult::Success,
        Some(ExecutionOutcome::CompileFailed(err)) | Some(ExecutionOutcome::RunFailed(err)) => {
            tracing::error!("{}", err);
            CommandResult::Error
        }
        None => {
            tracing::error!("script execution produced no outcome");
            CommandResult::Error
        }
    }
}

/// Terminates the executor when dropped unless [`finish`](Self::finish)
/// already did.
struct ExecutorSession<'s, E: ScriptExecutor + ?Sized> {
    executor: &'s mut E,
    active: bool,
}

impl<'s, E: ScriptExecutor + ?Sized> ExecutorSession<'s, E> {
    fn new(executor: &'s mut E) -> Self {
        Self {
            executor,
            active: true,
        }
    }

    fn initialize(&mut self, references: &[PathBuf], packs: Vec<Pack>) -> Result<()> {
        self.executor.initialize(references, packs)
    }

    fn execute(&mut self, script: &Path, args: &[String]) -> Result<Option<ExecutionOutcome>> {
        self.executor.execute(script, args)
    }

    fn finish(mut self) -> Result<()> {
        self.active = false;
        self.executor.terminate()
    }
}

impl<E: ScriptExecutor + ?Sized> Drop for ExecutorSession<'_, E> {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.executor.terminate() {
                tracing::warn!("failed to terminate script executor: {}", err);
            }
        }
    }
}
