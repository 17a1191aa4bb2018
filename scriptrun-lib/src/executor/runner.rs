use super::{ExecutionOutcome, ScriptError, ScriptExecutor};
use crate::config::SeparatorMode;
use crate::pack::Pack;
use crate::Config;
use anyhow::{anyhow, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const REFERENCES_ENV: &str = "SCRIPTRUN_REFERENCES";
pub const PACKS_ENV: &str = "SCRIPTRUN_PACKS";

/// Runs scripts through an external runner program such as `dotnet-script`.
pub struct ProcessExecutor {
    config: Config,
    // Runtime overrides from CLI
    pub flags_override: Option<Vec<String>>,
    pub dry_run: bool,
    references: Vec<PathBuf>,
    packs: Vec<Pack>,
    initialized: bool,
}

impl ProcessExecutor {
    pub fn with_overrides(config: Config, flags: Option<Vec<String>>, dry_run: bool) -> Self {
        Self {
            config,
            flags_override: flags,
            dry_run,
            references: Vec::new(),
            packs: Vec::new(),
            initialized: false,
        }
    }

    fn compile(&self, script: &Path) -> Result<Option<ScriptError>> {
        if let Err(source) = std::fs::File::open(script) {
            return Ok(Some(ScriptError::Unreadable {
                path: script.to_path_buf(),
                source,
            }));
        }

        let check_flags = &self.config.runner.check_flags;
        if check_flags.is_empty() || self.dry_run {
            return Ok(None);
        }

        let output = self
            .base_command()?
            .args(check_flags)
            .arg(script)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| anyhow!("Failed to start {}: {}", self.config.runner.program, err))?;

        if output.status.success() {
            return Ok(None);
        }

        Ok(Some(ScriptError::Compile {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }))
    }

    /// The full run command, with references and packs exported to the child.
    pub fn build_command(&self, script: &Path, args: &[String]) -> Result<Command> {
        let mut cmd = self.base_command()?;

        let flags = self.resolve_flags();
        cmd.args(&flags);
        cmd.arg(script);

        if !args.is_empty() && self.needs_separator(args) {
            cmd.arg("--");
        }
        cmd.args(args);

        Ok(cmd)
    }

    fn base_command(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.config.runner.program);

        let references = env::join_paths(&self.references)
            .map_err(|err| anyhow!("Cannot export assembly references: {}", err))?;
        cmd.env(REFERENCES_ENV, references);

        let names: Vec<&str> = self.packs.iter().map(|pack| pack.name.as_str()).collect();
        cmd.env(PACKS_ENV, names.join(","));

        for pack in &self.packs {
            cmd.envs(&pack.env);
        }

        Ok(cmd)
    }

    fn resolve_flags(&self) -> Vec<String> {
        if let Some(ref override_flags) = self.flags_override {
            return override_flags.clone();
        }

        if let Ok(env_flags) = env::var("SCRIPTRUN_RUNNER_FLAGS") {
            return env_flags.split_whitespace().map(|s| s.to_string()).collect();
        }

        self.config.runner.flags.clone()
    }

    fn needs_separator(&self, args: &[String]) -> bool {
        match self.config.runner.separator {
            SeparatorMode::Always => true,
            SeparatorMode::Never => false,
            SeparatorMode::Auto => args.iter().any(|arg| arg.starts_with('-')),
        }
    }

    fn describe(&self, cmd: &Command) -> String {
        let mut line = cmd.get_program().to_string_lossy().to_string();
        for arg in cmd.get_args() {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

impl ScriptExecutor for ProcessExecutor {
    fn initialize(&mut self, references: &[PathBuf], packs: Vec<Pack>) -> Result<()> {
        tracing::debug!(
            references = references.len(),
            packs = packs.len(),
            program = %self.config.runner.program,
            "initializing script executor"
        );
        self.references = references.to_vec();
        self.packs = packs;
        self.initialized = true;
        Ok(())
    }

    fn execute(&mut self, script: &Path, args: &[String]) -> Result<Option<ExecutionOutcome>> {
        if !self.initialized {
            return Err(anyhow!("Script executor used before initialization"));
        }

        if let Some(error) = self.compile(script)? {
            return Ok(Some(ExecutionOutcome::CompileFailed(error)));
        }

        let mut cmd = self.build_command(script, args)?;

        if self.dry_run {
            let packs_info = if self.packs.is_empty() {
                String::new()
            } else {
                let names: Vec<&str> = self.packs.iter().map(|p| p.name.as_str()).collect();
                format!(" [packs: {}]", names.join(","))
            };
            println!(
                "Would execute: {} [{} reference(s)]{}",
                self.describe(&cmd),
                self.references.len(),
                packs_info
            );
            return Ok(Some(ExecutionOutcome::Success));
        }

        let status = cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| anyhow!("Failed to start {}: {}", self.config.runner.program, err))?;

        match status.code() {
            Some(0) => Ok(Some(ExecutionOutcome::Success)),
            Some(code) => Ok(Some(ExecutionOutcome::RunFailed(ScriptError::Run { code }))),
            None => {
                tracing::warn!("{} terminated without an exit status", self.config.runner.program);
                Ok(None)
            }
        }
    }

    fn terminate(&mut self) -> Result<()> {
        if self.initialized {
            tracing::debug!("terminating script executor");
        }
        self.references.clear();
        self.packs.clear();
        self.initialized = false;
        Ok(())
    }
}
