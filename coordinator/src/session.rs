use crate::{
    options::{Frequency, ProfilingOptions},
    ranks::RankSelection,
};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// directory holding one marker file per registered participant
pub const PIDS_DIR: &str = "pids";
/// directory holding the marker of the launched profiler
pub const PROFILER_DIR: &str = "lpprof_pid";
/// sentinel created at step end
pub const SENTINEL: &str = "job_done";

/// One profiling invocation, scoped to a single job step
#[derive(Debug, Clone)]
pub struct Session {
    pub job_id: String,
    pub submit_dir: PathBuf,
    pub frequency: Frequency,
    pub ranks: RankSelection,
    pub total_tasks: u32,
    // PATH of the task, used to find the profiler and passed on to it
    pub search_path: Option<OsString>,
}

/// One task of the step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub rank: u32,
    pub global_rank: u32,
    pub pid: u32,
    pub hostname: Option<String>,
}

impl Participant {
    /// tag that disambiguates identical pids on different nodes
    pub fn tag(&self) -> Option<String> {
        self.hostname
            .as_ref()
            .map(|hostname| format!("{hostname}_{}", self.global_rank))
    }
}

/// Paths making up the shared state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    pub output_dir: PathBuf,
    pub pids_dir: PathBuf,
    pub profiler_dir: PathBuf,
    pub sentinel: PathBuf,
}

impl SessionLayout {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        let output_dir = output_dir.as_ref().to_path_buf();

        Self {
            pids_dir: output_dir.join(PIDS_DIR),
            profiler_dir: output_dir.join(PROFILER_DIR),
            sentinel: output_dir.join(SENTINEL),
            output_dir,
        }
    }
}

impl Session {
    pub fn new(
        job_id: impl Into<String>,
        submit_dir: impl Into<PathBuf>,
        options: &ProfilingOptions,
        total_tasks: u32,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            submit_dir: submit_dir.into(),
            frequency: options.frequency,
            ranks: options.ranks.clone(),
            total_tasks,
            search_path: None,
        }
    }

    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// `<submit_dir>/perf_<job_id>`
    pub fn output_dir(&self) -> PathBuf {
        self.submit_dir.join(format!("perf_{}", self.job_id))
    }

    pub fn layout(&self) -> SessionLayout {
        SessionLayout::new(self.output_dir())
    }

    pub fn is_enabled(&self) -> bool {
        self.frequency.is_enabled()
    }

    pub fn selects(&self, participant: &Participant) -> bool {
        participant.global_rank < self.total_tasks && self.ranks.contains(participant.global_rank)
    }

    /// global rank of the task that launches and waits for the profiler
    pub fn coordinator_rank(&self) -> Option<u32> {
        self.ranks.first_within(self.total_tasks)
    }

    pub fn is_coordinator(&self, participant: &Participant) -> bool {
        self.coordinator_rank() == Some(participant.global_rank)
    }

    /// number of registry entries the coordinator waits for
    pub fn expected_participants(&self) -> usize {
        usize::try_from(self.ranks.count_within(self.total_tasks)).unwrap_or(usize::MAX)
    }
}
