//! Loading containers from disk.
//!
//! A container is a `.cdef` manifest (see [`manifest`]). They are found either in directories,
//! through [`ContainerDirectories`], or bundled together in a zip archive, through
//! [`archive::ContainerArchive`].

use std::{
    fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use classlink_base::Container;

pub mod archive;
pub mod manifest;

pub use manifest::{parse_manifest, ManifestError};

/// Extension of container manifest files
pub const MANIFEST_EXTENSION: &str = "cdef";

#[derive(Debug)]
#[non_exhaustive]
pub enum LoadContainerError {
    Io { path: PathBuf, error: std::io::Error },
    Zip(zip::result::ZipError),
    Manifest { path: PathBuf, error: ManifestError },
    /// No directory has a file at the relative path
    NonexistentFile(PathBuf),
}
impl fmt::Display for LoadContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadContainerError::Io { path, error } => {
                write!(f, "failed to read '{}': {}", path.display(), error)
            }
            LoadContainerError::Zip(err) => write!(f, "bad archive: {}", err),
            LoadContainerError::Manifest { path, error } => {
                write!(f, "bad manifest '{}': {}", path.display(), error)
            }
            LoadContainerError::NonexistentFile(path) => {
                write!(f, "no container at '{}'", path.display())
            }
        }
    }
}
impl std::error::Error for LoadContainerError {}

/// Directories searched, in order, for container manifests
#[derive(Debug, Default, Clone)]
pub struct ContainerDirectories {
    directories: Vec<PathBuf>,
}
impl ContainerDirectories {
    pub fn add(&mut self, path: &Path) -> std::io::Result<()> {
        self.directories.push(path.canonicalize()?);
        Ok(())
    }

    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    #[must_use]
    pub fn load_container_with_rel_path(&self, rel_path: &Path) -> Option<(PathBuf, File)> {
        for directory in &self.directories {
            let full_path = directory.join(rel_path);
            if let Ok(file) = File::open(&full_path) {
                return Some((full_path, file));
            }
        }

        None
    }

    /// Load the first manifest found at `rel_path` in any of the directories
    pub fn load_container(&self, rel_path: &Path) -> Result<Container, LoadContainerError> {
        let (path, mut file) = self
            .load_container_with_rel_path(rel_path)
            .ok_or_else(|| LoadContainerError::NonexistentFile(rel_path.to_owned()))?;

        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|error| LoadContainerError::Io {
                path: path.clone(),
                error,
            })?;

        parse_manifest(&container_name(&path), &text)
            .map_err(|error| LoadContainerError::Manifest { path, error })
    }

    /// Every manifest directly inside the directories, each directory's sorted by name
    pub fn manifest_paths(&self) -> Result<Vec<PathBuf>, LoadContainerError> {
        let mut paths = Vec::new();
        for directory in &self.directories {
            let io_error = |error| LoadContainerError::Io {
                path: directory.clone(),
                error,
            };

            let mut found = Vec::new();
            for entry in std::fs::read_dir(directory).map_err(io_error)? {
                let path = entry.map_err(io_error)?.path();
                if path.is_file() && path.extension().map_or(false, |x| x == MANIFEST_EXTENSION) {
                    found.push(path);
                }
            }

            found.sort();
            paths.extend(found);
        }

        Ok(paths)
    }

    /// Load every manifest in the directories, in the order of [`Self::manifest_paths`]
    pub fn load_containers(&self) -> Result<Vec<Container>, LoadContainerError> {
        let paths = self.manifest_paths()?;
        let mut containers = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|error| LoadContainerError::Io {
                path: path.clone(),
                error,
            })?;
            let container = parse_manifest(&container_name(&path), &text)
                .map_err(|error| LoadContainerError::Manifest { path, error })?;
            containers.push(container);
        }

        tracing::info!(
            "Loaded {} containers from {} directories",
            containers.len(),
            self.directories.len()
        );
        Ok(containers)
    }
}

/// Containers are named after their manifest's file name
pub(crate) fn container_name(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| path.to_string_lossy(), |x| x.to_string_lossy())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fresh directory under the system temp directory, removed when dropped
    struct TempDir(PathBuf);
    impl TempDir {
        fn new(name: &str) -> TempDir {
            let path = std::env::temp_dir().join(format!(
                "classlink-containers-{}-{}",
                name,
                std::process::id()
            ));
            let _ = std::fs::remove_dir_all(&path);
            std::fs::create_dir_all(&path).unwrap();
            TempDir(path)
        }

        fn write(&self, name: &str, text: &str) {
            std::fs::write(self.0.join(name), text).unwrap();
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_load_directories() {
        let first = TempDir::new("first");
        first.write("b.cdef", "Class: LPkg/B;\n");
        first.write("a.cdef", "Class: LPkg/A;\nMethod: public run()V\n");
        first.write("notes.txt", "not a manifest");
        let second = TempDir::new("second");
        second.write("a.cdef", "Class: LPkg/Other;\n");

        let mut directories = ContainerDirectories::default();
        directories.add(&first.0).unwrap();
        directories.add(&second.0).unwrap();
        assert!(directories.add(&first.0.join("missing")).is_err());
        assert_eq!(directories.directories().len(), 2);

        let names: Vec<_> = directories
            .manifest_paths()
            .unwrap()
            .iter()
            .map(|path| container_name(path))
            .collect();
        assert_eq!(names, vec!["a", "b", "a"]);

        let containers = directories.load_containers().unwrap();
        assert_eq!(containers.len(), 3);
        assert!(containers[0].find_class_def("LPkg/A;").is_some());
        assert!(containers[2].find_class_def("LPkg/Other;").is_some());

        // The first directory wins
        let a = directories.load_container(Path::new("a.cdef")).unwrap();
        assert_eq!(a.name(), "a");
        assert!(a.find_class_def("LPkg/A;").is_some());
        assert!(matches!(
            directories.load_container(Path::new("c.cdef")),
            Err(LoadContainerError::NonexistentFile(_))
        ));
    }

    #[test]
    fn test_bad_manifest() {
        let dir = TempDir::new("bad");
        dir.write("bad.cdef", "Field: I x\n");

        let mut directories = ContainerDirectories::default();
        directories.add(&dir.0).unwrap();
        assert!(matches!(
            directories.load_containers(),
            Err(LoadContainerError::Manifest {
                error: ManifestError::MissingClass { section: 0 },
                ..
            })
        ));
    }
}
