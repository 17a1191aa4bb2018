use crate::assembly::{AssemblyFilter, AssemblyNameReader, IndeterminatePolicy};
use crate::config::PROJECT_CONFIG_FILE;
use crate::fs::FileSystem;
use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Project-local folder scanned for assembly references.
pub const BIN_DIR: &str = "bin";

const ASSEMBLY_PATTERNS: [&str; 2] = ["*.dll", "*.exe"];

#[derive(Debug, Clone)]
pub struct ProjectRoot {
    pub path: PathBuf,
    pub source: ProjectRootSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRootSource {
    ScriptrunToml,
    Git,
    StartDir,
}

pub fn find_project_root(start_dir: &Path) -> Option<ProjectRoot> {
    let mut current = start_dir;

    loop {
        if current.join(PROJECT_CONFIG_FILE).exists() {
            return Some(ProjectRoot {
                path: current.to_path_buf(),
                source: ProjectRootSource::ScriptrunToml,
            });
        }

        if current.join(".git").exists() {
            return Some(ProjectRoot {
                path: current.to_path_buf(),
                source: ProjectRootSource::Git,
            });
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    Some(ProjectRoot {
        path: start_dir.to_path_buf(),
        source: ProjectRootSource::StartDir,
    })
}

/// Finds the assemblies a script may reference in `<working dir>/bin`.
pub struct AssemblyDiscovery<'a> {
    file_system: &'a dyn FileSystem,
    filter: AssemblyFilter<'a>,
}

impl<'a> AssemblyDiscovery<'a> {
    pub fn new(file_system: &'a dyn FileSystem, reader: &'a dyn AssemblyNameReader) -> Self {
        Self::with_policy(file_system, reader, IndeterminatePolicy::default())
    }

    pub fn with_policy(
        file_system: &'a dyn FileSystem,
        reader: &'a dyn AssemblyNameReader,
        policy: IndeterminatePolicy,
    ) -> Self {
        Self {
            file_system,
            filter: AssemblyFilter::with_policy(reader, policy),
        }
    }

    /// Creates `bin` when missing. File-system errors are returned as-is.
    pub fn discover_assemblies(&self, working_directory: &Path) -> Result<Vec<PathBuf>> {
        let bin_folder = working_directory.join(BIN_DIR);

        if !self.file_system.directory_exists(&bin_folder) {
            self.file_system.create_directory(&bin_folder)?;
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for pattern in ASSEMBLY_PATTERNS {
            for path in self.file_system.enumerate_files(&bin_folder, pattern)? {
                if seen.insert(path.clone()) {
                    candidates.push(path);
                }
            }
        }

        let assembly_paths: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|path| self.filter.is_library(path))
            .collect();

        for path in &assembly_paths {
            if let Some(file_name) = path.file_name() {
                tracing::debug!("Found assembly reference: {}", file_name.to_string_lossy());
            }
        }

        Ok(assembly_paths)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assembly::tests::{managed_image, FakeReader};
    use crate::assembly::PeAssemblyReader;
    use crate::fs::LocalFileSystem;
    use crate::Config;
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    /// In-memory file system keyed by directory; glob patterns are matched
    /// on the extension only.
    #[derive(Default)]
    pub(crate) struct FakeFileSystem {
        pub working_directory: Option<PathBuf>,
        pub directories: RefCell<Vec<PathBuf>>,
        pub files: BTreeMap<PathBuf, Vec<PathBuf>>,
        pub created: RefCell<Vec<PathBuf>>,
        pub fail_enumeration: bool,
        pub fail_working_directory: bool,
        pub enumerations: RefCell<usize>,
    }

    impl FileSystem for FakeFileSystem {
        fn get_working_directory(&self, _script: &Path) -> Result<Option<PathBuf>> {
            if self.fail_working_directory {
                return Err(anyhow!("path too long"));
            }
            Ok(self.working_directory.clone())
        }

        fn directory_exists(&self, path: &Path) -> bool {
            self.directories.borrow().iter().any(|d| d == path)
        }

        fn create_directory(&self, path: &Path) -> Result<()> {
            self.created.borrow_mut().push(path.to_path_buf());
            self.directories.borrow_mut().push(path.to_path_buf());
            Ok(())
        }

        fn enumerate_files(&self, directory: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
            *self.enumerations.borrow_mut() += 1;
            if self.fail_enumeration {
                return Err(anyhow!("permission denied: {}", directory.display()));
            }
            let extension = pattern.trim_start_matches("*.");
            Ok(self
                .files
                .get(directory)
                .map(|files| {
                    files
                        .iter()
                        .filter(|f| f.extension().map_or(false, |e| e == extension))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    /// Reports every file twice, once per pattern.
    struct EchoFileSystem(Vec<PathBuf>);

    impl FileSystem for EchoFileSystem {
        fn get_working_directory(&self, _script: &Path) -> Result<Option<PathBuf>> {
            Ok(None)
        }

        fn directory_exists(&self, _path: &Path) -> bool {
            true
        }

        fn create_directory(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn enumerate_files(&self, _directory: &Path, _pattern: &str) -> Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn creates_missing_bin_and_returns_nothing() {
        let fs = FakeFileSystem::default();
        let reader = FakeReader::default();

        let found = AssemblyDiscovery::new(&fs, &reader)
            .discover_assemblies(Path::new("/proj"))
            .unwrap();

        assert!(found.is_empty());
        assert_eq!(*fs.created.borrow(), vec![PathBuf::from("/proj/bin")]);
    }

    #[test]
    fn existing_bin_is_not_recreated() {
        let fs = FakeFileSystem {
            directories: RefCell::new(vec![PathBuf::from("/proj/bin")]),
            ..Default::default()
        };
        let reader = FakeReader::default();

        AssemblyDiscovery::new(&fs, &reader)
            .discover_assemblies(Path::new("/proj"))
            .unwrap();

        assert!(fs.created.borrow().is_empty());
    }

    #[test]
    fn path_matching_both_patterns_is_listed_once() {
        let fs = EchoFileSystem(vec![PathBuf::from("/proj/bin/Both.dll")]);
        let reader = FakeReader::default();

        let found = AssemblyDiscovery::new(&fs, &reader)
            .discover_assemblies(Path::new("/proj"))
            .unwrap();

        assert_eq!(found, vec![PathBuf::from("/proj/bin/Both.dll")]);
        assert_eq!(reader.calls.borrow()[Path::new("/proj/bin/Both.dll")], 1);
    }

    #[test]
    fn keeps_dlls_before_exes_and_drops_bad_images() {
        let bin = PathBuf::from("/proj/bin");
        let fs = FakeFileSystem {
            directories: RefCell::new(vec![bin.clone()]),
            files: BTreeMap::from([(
                bin.clone(),
                vec![
                    bin.join("App.exe"),
                    bin.join("Acme.dll"),
                    bin.join("native.dll"),
                    bin.join("locked.dll"),
                ],
            )]),
            ..Default::default()
        };
        let reader = FakeReader {
            bad_images: vec![bin.join("native.dll")],
            io_failures: vec![bin.join("locked.dll")],
            ..Default::default()
        };

        let found = AssemblyDiscovery::new(&fs, &reader)
            .discover_assemblies(Path::new("/proj"))
            .unwrap();

        assert_eq!(
            found,
            vec![bin.join("Acme.dll"), bin.join("locked.dll"), bin.join("App.exe")]
        );
    }

    #[test]
    fn exclude_policy_drops_unreadable_candidates() {
        let bin = PathBuf::from("/proj/bin");
        let fs = FakeFileSystem {
            directories: RefCell::new(vec![bin.clone()]),
            files: BTreeMap::from([(bin.clone(), vec![bin.join("Acme.dll"), bin.join("locked.dll")])]),
            ..Default::default()
        };
        let reader = FakeReader {
            io_failures: vec![bin.join("locked.dll")],
            ..Default::default()
        };

        let found = AssemblyDiscovery::with_policy(&fs, &reader, IndeterminatePolicy::Exclude)
            .discover_assemblies(Path::new("/proj"))
            .unwrap();

        assert_eq!(found, vec![bin.join("Acme.dll")]);
    }

    #[test]
    fn enumeration_errors_propagate() {
        let fs = FakeFileSystem {
            fail_enumeration: true,
            ..Default::default()
        };
        let reader = FakeReader::default();

        let err = AssemblyDiscovery::new(&fs, &reader)
            .discover_assemblies(Path::new("/proj"))
            .unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn discovers_real_assemblies_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let bin = temp_dir.path().join(BIN_DIR);
        fs::create_dir(&bin).unwrap();
        fs::write(bin.join("Acme.Core.dll"), managed_image(true)).unwrap();
        fs::write(bin.join("Tool.exe"), managed_image(false)).unwrap();
        fs::write(bin.join("libnative.dll"), b"\x7fELF not managed").unwrap();
        fs::write(bin.join("readme.txt"), "docs").unwrap();

        let local = LocalFileSystem::new(Config::default());
        let discovery = AssemblyDiscovery::new(&local, &PeAssemblyReader);

        let first = discovery.discover_assemblies(temp_dir.path()).unwrap();
        assert_eq!(first, vec![bin.join("Acme.Core.dll"), bin.join("Tool.exe")]);

        let second = discovery.discover_assemblies(temp_dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn creates_bin_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let local = LocalFileSystem::new(Config::default());

        let found = AssemblyDiscovery::new(&local, &PeAssemblyReader)
            .discover_assemblies(temp_dir.path())
            .unwrap();

        assert!(found.is_empty());
        assert!(temp_dir.path().join(BIN_DIR).is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_assembly_is_discovered() {
        let temp_dir = TempDir::new().unwrap();
        let build = temp_dir.path().join("build");
        fs::create_dir(&build).unwrap();
        fs::write(build.join("Acme.dll"), managed_image(true)).unwrap();
        let bin = temp_dir.path().join(BIN_DIR);
        fs::create_dir(&bin).unwrap();
        std::os::unix::fs::symlink(build.join("Acme.dll"), bin.join("Acme.dll")).unwrap();

        let local = LocalFileSystem::new(Config::default());
        let found = AssemblyDiscovery::new(&local, &PeAssemblyReader)
            .discover_assemblies(temp_dir.path())
            .unwrap();

        assert_eq!(found, vec![bin.join("Acme.dll")]);
    }

    #[test]
    fn logs_file_names_only() {
        let temp_dir = TempDir::new().unwrap();
        let bin = temp_dir.path().join(BIN_DIR);
        fs::create_dir(&bin).unwrap();
        fs::write(bin.join("Acme.Core.dll"), managed_image(true)).unwrap();

        let local = LocalFileSystem::new(Config::default());
        let logs = crate::command::tests::capture_logs(|| {
            AssemblyDiscovery::new(&local, &PeAssemblyReader)
                .discover_assemblies(temp_dir.path())
                .unwrap();
        });

        assert!(logs.contains("Found assembly reference: Acme.Core.dll"));
        assert!(!logs.contains(&bin.display().to_string()));
    }

    #[test]
    fn project_root_prefers_nearest_marker() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        let nested = temp_dir.path().join("tools");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join(PROJECT_CONFIG_FILE), "").unwrap();

        let root = find_project_root(&nested).unwrap();
        assert_eq!(root.path, nested);
        assert_eq!(root.source, ProjectRootSource::ScriptrunToml);

        let root = find_project_root(temp_dir.path()).unwrap();
        assert_eq!(root.source, ProjectRootSource::Git);
    }
}
