pub mod assembly;
pub mod command;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod fs;
pub mod pack;

pub use assembly::{AssemblyFilter, AssemblyNameReader, IndeterminatePolicy, PeAssemblyReader};
pub use command::{CommandResult, ExecuteScriptCommand, ScriptInvocation};
pub use config::Config;
pub use discovery::{AssemblyDiscovery, ProjectRoot};
pub use executor::{ExecutionOutcome, ExitCode, ProcessExecutor, ScriptExecutor};
pub use fs::{FileSystem, LocalFileSystem};
pub use pack::{ConfigPackResolver, Pack, PackResolver};

use anyhow::Result;
use std::path::PathBuf;

/// Services shared by every command, built once from the effective config.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub file_system: LocalFileSystem,
    pub pack_resolver: ConfigPackResolver,
    pub assembly_reader: PeAssemblyReader,
}

impl Context {
    pub fn new(config_override: Option<PathBuf>) -> Result<Self> {
        let config = Config::load_with_override(config_override)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            file_system: LocalFileSystem::new(config.clone()),
            pack_resolver: ConfigPackResolver::new(config.clone()),
            assembly_reader: PeAssemblyReader,
            config,
        }
    }

    pub fn execute_command<'a>(
        &'a self,
        invocation: ScriptInvocation,
        executor: &'a mut dyn ScriptExecutor,
    ) -> ExecuteScriptCommand<'a> {
        ExecuteScriptCommand::new(
            invocation,
            &self.file_system,
            executor,
            &self.pack_resolver,
            &self.assembly_reader,
        )
        .with_indeterminate_policy(self.config.core.indeterminate_assemblies)
    }

    pub fn discovery(&self) -> AssemblyDiscovery<'_> {
        AssemblyDiscovery::with_policy(
            &self.file_system,
            &self.assembly_reader,
            self.config.core.indeterminate_assemblies,
        )
    }
}
