use super::{poll_until, PollSettings, SyncError};
use crate::distributed::{RegistryError, SharedRegistry};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum BarrierError {
    #[error("{registered}/{expected} participants registered: {source}")]
    Timeout {
        expected: usize,
        registered: usize,
        #[source]
        source: SyncError,
    },
    #[error("Registry holds {found} entries but only {expected} participants are expected")]
    Overfull { expected: usize, found: usize },
}

/// block until `registry` holds exactly `expected` entries
///
/// Listing errors are treated as transient (another task may be writing into the directory) and
/// retried until the timeout. Entries are never removed while the barrier is in use, so more
/// entries than expected can never turn into a match and fails right away.
#[instrument(skip(registry), level = "debug")]
pub fn wait_for_all<R: SharedRegistry + ?Sized>(
    registry: &R,
    expected: usize,
    settings: &PollSettings,
) -> Result<(), BarrierError> {
    let mut registered = 0;

    let outcome = poll_until("participant registration", settings, || {
        match registry.count() {
            Ok(count) if count > expected => Err(BarrierError::Overfull {
                expected,
                found: count,
            }),
            Ok(count) => {
                if count != registered {
                    debug!("{count}/{expected} participants registered");
                    registered = count;
                }

                Ok(count == expected)
            }
            Err(error) => {
                log_transient(&error);

                Ok(false)
            }
        }
    })?;

    match outcome {
        Ok(waited) => {
            info!("All {expected} participants registered after {waited:?}");

            Ok(())
        }
        Err(source) => {
            warn!("Gave up waiting for participants, {registered}/{expected} registered");

            Err(BarrierError::Timeout {
                expected,
                registered,
                source,
            })
        }
    }
}

fn log_transient(error: &RegistryError) {
    debug!(error = ?error, "Failed to count registry entries, retrying: {error}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::MemoryRegistry;
    use std::{thread, time::Duration};

    fn registry_with(ids: &[u32]) -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        registry.ensure().unwrap();

        for id in ids {
            registry.register(*id, None).unwrap();
        }

        registry
    }

    #[test]
    fn complete_registry_passes_immediately() {
        let registry = registry_with(&[1, 2, 3, 4]);

        wait_for_all(&registry, 4, &PollSettings::from_millis(10, 0)).unwrap();
    }

    #[test]
    fn waits_for_late_participants() {
        let registry = registry_with(&[1, 2]);
        let late = registry.clone();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            late.register(3, None).unwrap();
            thread::sleep(Duration::from_millis(30));
            late.register(4, None).unwrap();
        });

        wait_for_all(&registry, 4, &PollSettings::from_millis(5, 5_000)).unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn missing_participant_times_out() {
        let registry = registry_with(&[1, 2, 3]);

        match wait_for_all(&registry, 4, &PollSettings::from_millis(5, 50)) {
            Err(BarrierError::Timeout {
                expected: 4,
                registered: 3,
                ..
            }) => {}
            other => panic!("unexpected barrier outcome: {other:?}"),
        }
    }

    #[test]
    fn transient_listing_failures_are_retried() {
        let registry = registry_with(&[1, 2]);
        registry.fail_next_listings(3);

        wait_for_all(&registry, 2, &PollSettings::from_millis(1, 5_000)).unwrap();
    }

    #[test]
    fn missing_registry_is_retried_until_timeout() {
        let registry = MemoryRegistry::new();

        assert!(matches!(
            wait_for_all(&registry, 1, &PollSettings::from_millis(5, 20)),
            Err(BarrierError::Timeout { registered: 0, .. })
        ));
    }

    #[test]
    fn stale_entries_fail_fast() {
        let registry = registry_with(&[1, 2, 3]);

        assert!(matches!(
            wait_for_all(&registry, 2, &PollSettings::from_millis(5, 60_000)),
            Err(BarrierError::Overfull {
                expected: 2,
                found: 3
            })
        ));
    }
}
