use super::{parse_id, HostError, JobHost};
use crate::distributed::util::hostname;
use std::env;

pub const SUBMIT_DIR: &str = "SLURM_SUBMIT_DIR";
pub const JOB_ID: &str = "SLURM_JOB_ID";
pub const SEARCH_PATH: &str = "PATH";
pub const NODE_NAME: &str = "SLURMD_NODENAME";
pub const STEP_TASKS: &str = "SLURM_STEP_NUM_TASKS";
pub const LOCAL_ID: &str = "SLURM_LOCALID";
pub const PROC_ID: &str = "SLURM_PROCID";
pub const TASK_PID: &str = "SLURM_TASK_PID";

/// Slurm task environment, as seen by task prolog/epilog scripts or a task wrapper
#[derive(Debug, Clone, Default)]
pub struct SlurmHost {
    // profiled pid when it is not the one Slurm reports, e.g. a child spawned by `lpprof run`
    pid_override: Option<u32>,
}

impl SlurmHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_pid(pid: u32) -> Self {
        Self {
            pid_override: Some(pid),
        }
    }

    fn id(&self, name: &str) -> Result<u32, HostError> {
        parse_id(name, self.require_env(name)?)
    }
}

impl JobHost for SlurmHost {
    fn get_env(&self, name: &str) -> Option<String> {
        env::var(name).ok().filter(|value| !value.is_empty())
    }

    fn task_rank(&self) -> Result<u32, HostError> {
        self.id(LOCAL_ID)
    }

    fn task_global_rank(&self) -> Result<u32, HostError> {
        self.id(PROC_ID)
    }

    fn total_task_count(&self) -> Result<u32, HostError> {
        // only processes launched as part of a step carry the step task count
        self.id(STEP_TASKS)
    }

    fn task_pid(&self) -> Result<u32, HostError> {
        if let Some(pid) = self.pid_override {
            return Ok(pid);
        }

        match self.get_env(TASK_PID) {
            Some(value) => parse_id(TASK_PID, value),
            // invoked directly by the task, so the parent is the task process
            None => Ok(nix::unistd::getppid().as_raw() as u32),
        }
    }

    fn hostname(&self) -> Option<String> {
        self.get_env(NODE_NAME).or_else(hostname)
    }
}
