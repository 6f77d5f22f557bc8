use crate::{
    distributed::{RegistryError, SessionStore, SharedRegistry},
    executors::ProcessControl,
    sync::{PollSettings, SyncError},
};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("Failed to signal job completion: {0}")]
    Signal(#[source] RegistryError),
    #[error("Failed to look up the profiler pid: {0}")]
    Lookup(#[source] RegistryError),
    #[error("Profiler {pid} did not exit: {source}")]
    Timeout {
        pid: u32,
        #[source]
        source: SyncError,
    },
    #[error("Failed to clean up session state: {0}")]
    Cleanup(#[source] RegistryError),
}

/// end the session: raise `job_done`, wait for the profiler and remove the shared state
///
/// Every step runs even if an earlier one failed, the first failure is returned. The sentinel is
/// only removed once the profiler is known to be gone, a profiler still running keeps seeing it.
#[instrument(skip(store, processes), level = "info")]
pub fn finish<S: SessionStore, P: ProcessControl + ?Sized>(
    store: &S,
    processes: &P,
    settings: &PollSettings,
) -> Result<(), ShutdownError> {
    let mut first_error = None;
    let mut record = |error: ShutdownError| {
        error!("{error}");
        first_error.get_or_insert(error);
    };

    if let Err(error) = store.signal_done() {
        record(ShutdownError::Signal(error));
    }

    let profilers = match store.profilers().enumerate() {
        Ok(pids) => pids,
        Err(error) => {
            record(ShutdownError::Lookup(error));
            Vec::new()
        }
    };

    if profilers.is_empty() {
        warn!("No profiler pid recorded, nothing to wait for");
    }

    let mut all_exited = true;

    for pid in profilers {
        info!("Waiting for profiler {pid} to finish writing");

        match processes.wait_for_exit(pid, settings) {
            Ok(()) => info!("Profiler {pid} finished"),
            Err(source) => {
                all_exited = false;
                record(ShutdownError::Timeout { pid, source });
            }
        }
    }

    if all_exited {
        if let Err(error) = store.clear_done() {
            record(ShutdownError::Cleanup(error));
        }
    } else {
        warn!("Leaving job_done in place, a profiler is still running");
    }

    for registry in [store.participants(), store.profilers()] {
        if let Err(error) = registry.clear() {
            record(ShutdownError::Cleanup(error));
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
