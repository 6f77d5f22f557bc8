use super::{
    util::{entry_name, parse_entry},
    RegistryError, SessionStore, SharedRegistry,
};
use crate::session::SessionLayout;
use itertools::Itertools;
use std::{
    fs::{self, DirBuilder, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Registry backed by a directory of empty marker files
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    path: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// names of all regular files in the directory
    fn entries(&self) -> Result<Vec<std::ffi::OsString>, RegistryError> {
        let listing = fs::read_dir(&self.path)
            .map_err(|error| RegistryError::io("list", &self.path, error))?;

        let mut names = Vec::new();

        for entry in listing {
            // entries can vanish between readdir and stat, e.g. NFS silly renames
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(path = ?self.path, error = ?error, "Skipped unreadable registry entry");
                    continue;
                }
            };

            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => names.push(entry.file_name()),
                Ok(_) => {}
                Err(error) => {
                    debug!(path = ?entry.path(), error = ?error, "Skipped registry entry without type")
                }
            }
        }

        Ok(names)
    }
}

impl SharedRegistry for DirectoryRegistry {
    fn ensure(&self) -> Result<(), RegistryError> {
        DirBuilder::new()
            .recursive(true)
            .create(&self.path)
            .map_err(|error| RegistryError::io("create directory", &self.path, error))
    }

    fn register(&self, id: u32, tag: Option<&str>) -> Result<(), RegistryError> {
        let path = self.path.join(entry_name(id, tag));

        // create_new never truncates or replaces an entry written by someone else
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(path = ?path, "Registered entry");

                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                debug!(path = ?path, "Entry was already registered");

                Ok(())
            }
            Err(error) => Err(RegistryError::io("register", &path, error)),
        }
    }

    fn enumerate(&self) -> Result<Vec<u32>, RegistryError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|name| {
                let id = parse_entry(&name);

                if id.is_none() {
                    warn!(path = ?self.path, entry = ?name, "Ignoring registry entry without a pid");
                }

                id
            })
            .sorted_unstable()
            .collect())
    }

    fn count(&self) -> Result<usize, RegistryError> {
        self.entries().map(|names| names.len())
    }

    fn clear(&self) -> Result<(), RegistryError> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(RegistryError::io("remove", &self.path, error)),
        }
    }
}

/// Session state laid out under `<submit_dir>/perf_<job_id>/`
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    layout: SessionLayout,
    participants: DirectoryRegistry,
    profilers: DirectoryRegistry,
}

impl DirectoryStore {
    pub fn new(layout: SessionLayout) -> Self {
        Self {
            participants: DirectoryRegistry::new(&layout.pids_dir),
            profilers: DirectoryRegistry::new(&layout.profiler_dir),
            layout,
        }
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }
}

impl SessionStore for DirectoryStore {
    type Registry = DirectoryRegistry;

    fn participants(&self) -> &Self::Registry {
        &self.participants
    }

    fn profilers(&self) -> &Self::Registry {
        &self.profilers
    }

    fn output_dir(&self) -> &Path {
        &self.layout.output_dir
    }

    fn prepare(&self) -> Result<(), RegistryError> {
        self.participants.ensure()?;
        self.profilers.ensure()
    }

    fn signal_done(&self) -> Result<(), RegistryError> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.layout.sentinel)
            .map(drop)
            .map_err(|error| RegistryError::io("create", &self.layout.sentinel, error))
    }

    fn clear_done(&self) -> Result<(), RegistryError> {
        match fs::remove_file(&self.layout.sentinel) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(RegistryError::io("remove", &self.layout.sentinel, error)),
        }
    }

    fn is_done(&self) -> bool {
        self.layout.sentinel.is_file()
    }
}
