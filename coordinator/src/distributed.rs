pub mod fs;
pub mod memory;
pub mod util;


/*
 * Coordination between tasks happens only through a shared directory tree:
 * 1. Every selected task drops a marker named after its pid into `pids/`
 * 2. The coordinator polls `pids/` until the expected number of markers exists
 * 3. The coordinator records the profiler pid in `lpprof_pid/`
 * 4. At step end the coordinator raises `job_done`, waits for the profiler and removes everything
 *
 * Each task only ever writes the marker it owns, so no locking is required. Only the coordinator
 * removes shared state and only once every task has registered.
 */

use std::{io, path::Path, path::PathBuf};
use thiserror::Error;

pub use self::{
    fs::{DirectoryRegistry, DirectoryStore},
    memory::{MemoryRegistry, MemoryStore},
};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to {action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Registry is unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    pub fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A set of process ids shared between processes
pub trait SharedRegistry {
    /// create the backing storage, calling this on existing storage is a no-op
    fn ensure(&self) -> Result<(), RegistryError>;

    /// add `id`, registering the same id and tag twice leaves a single entry
    fn register(&self, id: u32, tag: Option<&str>) -> Result<(), RegistryError>;

    /// all registered ids in ascending numeric order
    fn enumerate(&self) -> Result<Vec<u32>, RegistryError>;

    /// number of entries, without decoding them
    fn count(&self) -> Result<usize, RegistryError>;

    /// drop the registry with all of its entries, missing storage is not an error
    fn clear(&self) -> Result<(), RegistryError>;
}

/// Shared state of one session: the two registries plus the `job_done` sentinel
pub trait SessionStore {
    type Registry: SharedRegistry;

    /// registry of participant pids
    fn participants(&self) -> &Self::Registry;

    /// registry of profiler pids
    fn profilers(&self) -> &Self::Registry;

    /// directory the profiler writes into
    fn output_dir(&self) -> &Path;

    /// create the output directory and both registries
    fn prepare(&self) -> Result<(), RegistryError>;

    fn signal_done(&self) -> Result<(), RegistryError>;

    fn clear_done(&self) -> Result<(), RegistryError>;

    fn is_done(&self) -> bool;
}
