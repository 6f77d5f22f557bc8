use super::{util::entry_name, RegistryError, SessionStore, SharedRegistry};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

/// In-process registry with the same semantics as `DirectoryRegistry`
///
/// Clones share their entries, which allows several threads to stand in for participant processes.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    // entry name -> id
    entries: Arc<Mutex<Option<BTreeMap<String, u32>>>>,
    // number of upcoming listings that fail, to mimic a busy shared filesystem
    failing_listings: Arc<AtomicUsize>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// let the next `count` calls to `count`/`enumerate` fail
    pub fn fail_next_listings(&self, count: usize) {
        self.failing_listings.store(count, Ordering::SeqCst);
    }

    pub fn exists(&self) -> bool {
        self.entries.lock().is_some()
    }

    fn check_listing(&self) -> Result<(), RegistryError> {
        let failed = self
            .failing_listings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if failed {
            Err(RegistryError::Unavailable("listing failed".to_owned()))
        } else {
            Ok(())
        }
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, u32>) -> T,
    ) -> Result<T, RegistryError> {
        match self.entries.lock().as_mut() {
            Some(entries) => Ok(f(entries)),
            None => Err(RegistryError::Unavailable(
                "registry does not exist".to_owned(),
            )),
        }
    }
}

impl SharedRegistry for MemoryRegistry {
    fn ensure(&self) -> Result<(), RegistryError> {
        self.entries.lock().get_or_insert_with(BTreeMap::new);

        Ok(())
    }

    fn register(&self, id: u32, tag: Option<&str>) -> Result<(), RegistryError> {
        self.with_entries(|entries| {
            entries.entry(entry_name(id, tag)).or_insert(id);
        })
    }

    fn enumerate(&self) -> Result<Vec<u32>, RegistryError> {
        self.check_listing()?;
        self.with_entries(|entries| {
            let mut ids = entries.values().copied().collect::<Vec<_>>();
            ids.sort_unstable();
            ids
        })
    }

    fn count(&self) -> Result<usize, RegistryError> {
        self.check_listing()?;
        self.with_entries(|entries| entries.len())
    }

    fn clear(&self) -> Result<(), RegistryError> {
        self.entries.lock().take();

        Ok(())
    }
}

/// In-process session state
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    output_dir: PathBuf,
    participants: MemoryRegistry,
    profilers: MemoryRegistry,
    done: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }
}

impl SessionStore for MemoryStore {
    type Registry = MemoryRegistry;

    fn participants(&self) -> &Self::Registry {
        &self.participants
    }

    fn profilers(&self) -> &Self::Registry {
        &self.profilers
    }

    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn prepare(&self) -> Result<(), RegistryError> {
        self.participants.ensure()?;
        self.profilers.ensure()
    }

    fn signal_done(&self) -> Result<(), RegistryError> {
        self.done.store(true, Ordering::SeqCst);

        Ok(())
    }

    fn clear_done(&self) -> Result<(), RegistryError> {
        self.done.store(false, Ordering::SeqCst);

        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}
