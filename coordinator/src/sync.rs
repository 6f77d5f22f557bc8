pub mod barrier;

use std::{
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;

pub use barrier::{wait_for_all, BarrierError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },
}

/// Interval and upper bound of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_millis(interval: u64, timeout: u64) -> Self {
        Self::new(Duration::from_millis(interval), Duration::from_millis(timeout))
    }
}

/// call `done` until it reports completion or `settings.timeout` elapsed
///
/// `done` is always evaluated at least once, also with a zero timeout. Errors returned by `done`
/// abort the loop right away, transient failures have to be handled by the caller.
pub fn poll_until<E>(
    what: &str,
    settings: &PollSettings,
    mut done: impl FnMut() -> Result<bool, E>,
) -> Result<Result<Duration, SyncError>, E> {
    let start = Instant::now();

    loop {
        if done()? {
            return Ok(Ok(start.elapsed()));
        }

        let waited = start.elapsed();

        if waited >= settings.timeout {
            return Ok(Err(SyncError::Timeout {
                what: what.to_owned(),
                waited,
            }));
        }

        thread::sleep(settings.interval.min(settings.timeout - waited));
    }
}
