use thiserror::Error;
use tracing::debug;

const BYTES_PER_MEGABYTE: f64 = 1_000_000.0;

/// default ceiling for the aggregated sample volume
pub const DEFAULT_LIMIT_MB_PER_MINUTE: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "Profiling would write about {estimate_mb:.1} MB in {window_seconds}s, \
     the shared filesystem limit is {limit_mb:.1} MB; lower the frequency or the number of ranks"
)]
pub struct RateExceeded {
    pub estimate_mb: f64,
    pub limit_mb: f64,
    pub window_seconds: u64,
}

/// Upper bound for the volume all profiled tasks may write to the shared filesystem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateGuard {
    pub limit_mb_per_minute: f64,
}

impl Default for RateGuard {
    fn default() -> Self {
        Self {
            limit_mb_per_minute: DEFAULT_LIMIT_MB_PER_MINUTE,
        }
    }
}

impl RateGuard {
    pub fn new(limit_mb_per_minute: f64) -> Self {
        Self {
            limit_mb_per_minute,
        }
    }

    /// estimated volume in bytes written by `participant_count` tasks over `window_seconds`
    pub fn estimate(
        frequency: u32,
        participant_count: usize,
        sample_size_bytes: u64,
        window_seconds: u64,
    ) -> u128 {
        u128::from(frequency)
            .saturating_mul(participant_count as u128)
            .saturating_mul(u128::from(sample_size_bytes))
            .saturating_mul(u128::from(window_seconds))
    }

    /// reject configurations whose estimated volume exceeds the limit scaled to the window
    pub fn check(
        &self,
        frequency: u32,
        participant_count: usize,
        sample_size_bytes: u64,
        window_seconds: u64,
    ) -> Result<f64, RateExceeded> {
        let estimate_mb = Self::estimate(
            frequency,
            participant_count,
            sample_size_bytes,
            window_seconds,
        ) as f64
            / BYTES_PER_MEGABYTE;
        let limit_mb = self.limit_mb_per_minute * window_seconds as f64 / 60.0;

        debug!(
            estimate_mb = estimate_mb,
            limit_mb = limit_mb,
            "Estimated profiling write volume"
        );

        if estimate_mb > limit_mb {
            Err(RateExceeded {
                estimate_mb,
                limit_mb,
                window_seconds,
            })
        } else {
            Ok(estimate_mb)
        }
    }
}

/// `RateGuard::check` with the default limit
pub fn check(
    frequency: u32,
    participant_count: usize,
    sample_size_bytes: u64,
    window_seconds: u64,
) -> Result<f64, RateExceeded> {
    RateGuard::default().check(
        frequency,
        participant_count,
        sample_size_bytes,
        window_seconds,
    )
}
