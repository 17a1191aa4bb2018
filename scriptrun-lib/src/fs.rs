use crate::discovery::find_project_root;
use crate::Config;
use anyhow::{anyhow, Result};
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};

/// The file-system operations script execution depends on.
pub trait FileSystem {
    /// Directory a script runs against, or `None` when it cannot be located.
    fn get_working_directory(&self, script: &Path) -> Result<Option<PathBuf>>;

    fn directory_exists(&self, path: &Path) -> bool;

    fn create_directory(&self, path: &Path) -> Result<()>;

    /// Files directly inside `directory` whose name matches `pattern`, sorted.
    fn enumerate_files(&self, directory: &Path, pattern: &str) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    config: Config,
}

impl LocalFileSystem {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl FileSystem for LocalFileSystem {
    fn get_working_directory(&self, script: &Path) -> Result<Option<PathBuf>> {
        match self.config.core.cwd.as_str() {
            "current" => Ok(Some(std::env::current_dir()?)),
            mode @ ("script" | "project") => {
                if !script.is_file() {
                    return Ok(None);
                }
                let script_dir = match std::fs::canonicalize(script)?.parent() {
                    Some(parent) => parent.to_path_buf(),
                    None => return Ok(None),
                };
                if mode == "project" {
                    Ok(find_project_root(&script_dir).map(|root| root.path))
                } else {
                    Ok(Some(script_dir))
                }
            }
            custom_path => Ok(Some(self.config.expand_path(custom_path)?)),
        }
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .map_err(|err| anyhow!("Cannot create directory {}: {}", path.display(), err))
    }

    fn enumerate_files(&self, directory: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let pattern = Pattern::new(pattern)?;
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(directory)? {
            let entry = entry?;
            // Follows symlinks, so a linked assembly still counts.
            if !entry.path().is_file() {
                continue;
            }
            if pattern.matches_with(&entry.file_name().to_string_lossy(), options) {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}
