use crate::assembly::IndeterminatePolicy;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PROJECT_CONFIG_FILE: &str = ".scriptrun.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreConfig {
    /// Where a script's `bin` folder is looked up: "script", "project",
    /// "current" or a literal path. The runner itself inherits the caller's
    /// current directory.
    #[serde(default = "default_cwd")]
    pub cwd: String,

    #[serde(default)]
    pub indeterminate_assemblies: IndeterminatePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default)]
    pub flags: Vec<String>,

    /// Flags for a compile-only pass. Empty disables the compile check.
    #[serde(default)]
    pub check_flags: Vec<String>,

    #[serde(default)]
    pub separator: SeparatorMode,
}

/// When to put `--` between the script path and its arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparatorMode {
    /// Only when an argument looks like a runner option.
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub packs: BTreeMap<String, PackConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cwd: default_cwd(),
            indeterminate_assemblies: IndeterminatePolicy::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            flags: Vec::new(),
            check_flags: Vec::new(),
            separator: SeparatorMode::default(),
        }
    }
}

impl Config {
    pub fn load_with_override(config_path: Option<PathBuf>) -> Result<Self> {
        Self::load_cascading(config_path)
    }

    fn load_cascading(override_path: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(global_config_path) = Self::get_global_config_path() {
            if global_config_path.exists() {
                let global_config = Self::load_from_file(&global_config_path)?;
                config = config.merge_with(global_config);
            }
        }

        if let Some(project_config_path) = Self::find_project_config()? {
            let project_config = Self::load_from_file(&project_config_path)?;
            config = config.merge_with(project_config);
        }

        if let Some(override_path) = override_path {
            if override_path.exists() {
                let override_config = Self::load_from_file(&override_path)?;
                config = config.merge_with(override_config);
            } else {
                return Err(anyhow!("Config file not found: {}", override_path.display()));
            }
        }

        config.apply_env_overrides()
    }

    fn get_global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scriptrun").join("scriptrun.toml"))
    }

    fn find_project_config() -> Result<Option<PathBuf>> {
        let current_dir = std::env::current_dir()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(PROJECT_CONFIG_FILE);
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => return Ok(None),
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| anyhow!("Invalid config {}: {}", path.display(), err))
    }

    fn merge_with(mut self, other: Self) -> Self {
        if other.core.cwd != default_cwd() {
            self.core.cwd = other.core.cwd;
        }
        if other.core.indeterminate_assemblies != IndeterminatePolicy::default() {
            self.core.indeterminate_assemblies = other.core.indeterminate_assemblies;
        }

        if other.runner.program != default_program() {
            self.runner.program = other.runner.program;
        }
        if !other.runner.flags.is_empty() {
            self.runner.flags = other.runner.flags;
        }
        if !other.runner.check_flags.is_empty() {
            self.runner.check_flags = other.runner.check_flags;
        }
        if other.runner.separator != SeparatorMode::default() {
            self.runner.separator = other.runner.separator;
        }

        // Later layers replace a pack wholesale.
        for (name, pack) in other.packs {
            self.packs.insert(name, pack);
        }

        self
    }

    fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(val) = std::env::var("SCRIPTRUN_CWD") {
            self.core.cwd = val;
        }

        if let Ok(val) = std::env::var("SCRIPTRUN_RUNNER") {
            if !val.trim().is_empty() {
                self.runner.program = val;
            }
        }

        if let Ok(val) = std::env::var("SCRIPTRUN_INDETERMINATE") {
            self.core.indeterminate_assemblies = match val.as_str() {
                "include" => IndeterminatePolicy::Include,
                "exclude" => IndeterminatePolicy::Exclude,
                other => return Err(anyhow!("Invalid SCRIPTRUN_INDETERMINATE value: {}", other)),
            };
        }

        Ok(self)
    }

    pub fn expand_path(&self, path_str: &str) -> Result<PathBuf> {
        if let Some(rest) = path_str.strip_prefix("~/") {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot expand ~: home directory not found"))?;
            Ok(home.join(rest))
        } else if path_str == "~" {
            dirs::home_dir().ok_or_else(|| anyhow!("Cannot expand ~: home directory not found"))
        } else {
            Ok(PathBuf::from(path_str))
        }
    }
}

fn default_cwd() -> String {
    "script".to_string()
}

fn default_program() -> String {
    "dotnet-script".to_string()
}

fn default_enabled() -> bool {
    true
}
