use crate::{guard::RateGuard, sync::PollSettings};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to read config file {path:?}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Failed to deserialize config: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("Config contains errors, see the log for details")]
    Preflight,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub barrier: BarrierConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub guard: GuardConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProfilerConfig {
    // name or path of the sampling profiler, names are looked up in the task's PATH
    #[serde(default = "default_profiler_exec")]
    pub exec: PathBuf,
    // arguments placed in front of the generated ones
    #[serde(default)]
    pub params: Vec<String>,
    // milliseconds between the barrier and the launch, lets fresh tasks spawn their threads
    #[serde(default = "default_start_delay")]
    pub start_delay: u64,
    // file in the output directory receiving the profiler's stdout and stderr
    #[serde(default)]
    pub log: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    // append `<host>_<rank>` to registry entries, required once pids may repeat across nodes
    #[serde(default = "default_true")]
    pub tag_entries: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BarrierConfig {
    #[serde(default = "default_barrier_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_barrier_timeout")]
    pub timeout: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub timeout: u64,
    // sleep of non-coordinating tasks at exit
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    // bytes written per sample
    #[serde(default = "default_sample_size")]
    pub sample_size: u64,
    // seconds the estimate is computed over
    #[serde(default = "default_window")]
    pub window: u64,
    #[serde(default = "default_limit")]
    pub limit_mb_per_minute: f64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            exec: default_profiler_exec(),
            params: Vec::new(),
            start_delay: default_start_delay(),
            log: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tag_entries: default_true(),
        }
    }
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_barrier_interval(),
            timeout: default_barrier_timeout(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_shutdown_interval(),
            timeout: default_shutdown_timeout(),
            grace_period: default_grace_period(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            window: default_window(),
            limit_mb_per_minute: default_limit(),
        }
    }
}

impl ProfilerConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay)
    }
}

impl BarrierConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::from_millis(self.poll_interval, self.timeout)
    }
}

impl ShutdownConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::from_millis(self.poll_interval, self.timeout)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period)
    }
}

impl GuardConfig {
    pub fn rate_guard(&self) -> RateGuard {
        RateGuard::new(self.limit_mb_per_minute)
    }
}

impl CoordinatorConfig {
    /// load the config from `path`, no path means defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let file = File::open(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// validate the config, logging every problem before failing
    pub fn preflight_checks(&self) -> Result<(), ConfigErrors> {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.profiler.exec.as_os_str().is_empty() {
            error!("profiler.exec must name the sampling profiler");
            contains_error = true;
        } else if self.profiler.exec.components().count() > 1 {
            // explicit paths can be checked right away, bare names are resolved at launch
            match check_executable(&self.profiler.exec) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "profiler.exec ({}) is not executable",
                        self.profiler.exec.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to determine if profiler.exec ({}) is an executable: {e}",
                        self.profiler.exec.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        if self.profiler.start_delay > 10_000 {
            warn!(
                "profiler.start_delay is {}ms, the first seconds of the step will not be sampled",
                self.profiler.start_delay
            );
        }

        for (name, interval, timeout) in [
            ("barrier", self.barrier.poll_interval, self.barrier.timeout),
            (
                "shutdown",
                self.shutdown.poll_interval,
                self.shutdown.timeout,
            ),
        ] {
            if interval == 0 {
                error!("{name}.poll_interval cannot be 0, this would spin on the shared filesystem");
                contains_error = true;
            }

            if timeout < interval {
                error!("{name}.timeout ({timeout}ms) must not be shorter than {name}.poll_interval ({interval}ms)");
                contains_error = true;
            }
        }

        if self.guard.sample_size == 0 {
            error!("guard.sample_size cannot be 0");
            contains_error = true;
        }

        if self.guard.window == 0 {
            error!("guard.window cannot be 0");
            contains_error = true;
        }

        if !(self.guard.limit_mb_per_minute > 0.0) {
            error!("guard.limit_mb_per_minute must be a positive number");
            contains_error = true;
        }

        if contains_error {
            Err(ConfigErrors::Preflight)
        } else {
            Ok(())
        }
    }
}

fn default_profiler_exec() -> PathBuf {
    PathBuf::from("lpprof-sampler")
}

fn default_start_delay() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_barrier_interval() -> u64 {
    100
}

fn default_barrier_timeout() -> u64 {
    60_000
}

fn default_shutdown_interval() -> u64 {
    500
}

fn default_shutdown_timeout() -> u64 {
    300_000
}

fn default_grace_period() -> u64 {
    1_000
}

fn default_sample_size() -> u64 {
    30
}

fn default_window() -> u64 {
    60
}

fn default_limit() -> f64 {
    crate::guard::DEFAULT_LIMIT_MB_PER_MINUTE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_means_defaults() {
        let config = CoordinatorConfig::load(None).unwrap();

        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.profiler.exec, PathBuf::from("lpprof-sampler"));
        assert_eq!(
            config.barrier.poll_settings(),
            PollSettings::from_millis(100, 60_000)
        );
        assert!(config.registry.tag_entries);
        config.preflight_checks().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = CoordinatorConfig::from_yaml(
            "barrier:\n  timeout: 5000\nguard:\n  limit_mb_per_minute: 20\n",
        )
        .unwrap();

        assert_eq!(config.barrier.timeout, 5_000);
        assert_eq!(config.barrier.poll_interval, 100);
        assert_eq!(config.guard.rate_guard(), RateGuard::new(20.0));
        assert_eq!(config.shutdown, ShutdownConfig::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            CoordinatorConfig::from_yaml("barrier:\n  timeout_ms: 10\n"),
            Err(ConfigErrors::Deserialize(_))
        ));
    }

    #[test]
    fn load_reads_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "profiler:\n  exec: perf-wrapper\n  params: [\"-g\"]").unwrap();

        let config = CoordinatorConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.profiler.exec, PathBuf::from("perf-wrapper"));
        assert_eq!(config.profiler.params, vec!["-g".to_owned()]);
    }

    #[test]
    fn unreadable_file_is_reported() {
        assert!(matches!(
            CoordinatorConfig::load(Some(Path::new("/nonexistent/lpprof.yaml"))),
            Err(ConfigErrors::ReadConfig { .. })
        ));
    }

    #[test]
    fn preflight_collects_all_errors() {
        let mut config = CoordinatorConfig::default();
        config.barrier.poll_interval = 0;
        config.shutdown.timeout = 10;
        config.guard.window = 0;

        assert!(matches!(
            config.preflight_checks(),
            Err(ConfigErrors::Preflight)
        ));
    }

    #[test]
    fn preflight_checks_explicit_exec_paths() {
        let file = NamedTempFile::new().unwrap();
        let mut config = CoordinatorConfig::default();
        config.profiler.exec = file.path().to_path_buf();

        // freshly created temp files are not executable
        assert!(config.preflight_checks().is_err());

        config.profiler.exec = PathBuf::from("/bin/sh");
        config.preflight_checks().unwrap();
    }
}
