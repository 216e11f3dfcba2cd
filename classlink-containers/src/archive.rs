use std::{
    fs::File,
    io::{Read, Seek},
    path::{Path, PathBuf},
};

use classlink_base::Container;
use zip::ZipArchive;

use crate::{container_name, parse_manifest, LoadContainerError, MANIFEST_EXTENSION};

/// A zip archive of container manifests
#[derive(Debug)]
pub struct ContainerArchive<R> {
    path: PathBuf,
    archive: ZipArchive<R>,
}
impl ContainerArchive<File> {
    pub fn open(path: &Path) -> Result<ContainerArchive<File>, LoadContainerError> {
        let file = File::open(path).map_err(|error| LoadContainerError::Io {
            path: path.to_owned(),
            error,
        })?;
        ContainerArchive::new(path.to_owned(), file)
    }
}
impl<R: Read + Seek> ContainerArchive<R> {
    /// `path` is only used to name the archive in errors
    pub fn new(path: PathBuf, reader: R) -> Result<ContainerArchive<R>, LoadContainerError> {
        let archive = ZipArchive::new(reader).map_err(LoadContainerError::Zip)?;
        Ok(ContainerArchive { path, archive })
    }

    /// Names of the manifests in the archive, sorted
    #[must_use]
    pub fn manifest_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .archive
            .file_names()
            .filter(|name| {
                Path::new(name)
                    .extension()
                    .map_or(false, |x| x == MANIFEST_EXTENSION)
            })
            .map(str::to_owned)
            .collect();
        names.sort();
        names
    }

    /// Load every manifest in the archive, in the order of [`Self::manifest_names`]
    pub fn load_containers(&mut self) -> Result<Vec<Container>, LoadContainerError> {
        let names = self.manifest_names();
        let mut containers = Vec::with_capacity(names.len());
        for name in names {
            let entry_path = self.path.join(&name);

            let mut entry = self
                .archive
                .by_name(&name)
                .map_err(LoadContainerError::Zip)?;
            if !entry.is_file() {
                tracing::warn!("Skipping '{}' since it is not a file", entry_path.display());
                continue;
            }

            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|error| LoadContainerError::Io {
                    path: entry_path.clone(),
                    error,
                })?;

            let container = parse_manifest(&container_name(Path::new(&name)), &text).map_err(
                |error| LoadContainerError::Manifest {
                    path: entry_path,
                    error,
                },
            )?;
            containers.push(container);
        }

        tracing::info!(
            "Loaded {} containers from '{}'",
            containers.len(),
            self.path.display()
        );
        Ok(containers)
    }
}
