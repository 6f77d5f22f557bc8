pub mod slurm;

use std::collections::BTreeMap;
use thiserror::Error;

pub use slurm::SlurmHost;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{0} is not set in the task environment")]
    NotFound(String),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: String, value: String },
}

/// What the core needs from the job launcher hosting the hooks
pub trait JobHost {
    fn get_env(&self, name: &str) -> Option<String>;

    /// task id within the node
    fn task_rank(&self) -> Result<u32, HostError>;

    /// task id within the step
    fn task_global_rank(&self) -> Result<u32, HostError>;

    /// number of tasks in the step, `NotFound` for processes that are not tasks
    fn total_task_count(&self) -> Result<u32, HostError>;

    /// pid of the task process that is profiled
    fn task_pid(&self) -> Result<u32, HostError>;

    fn hostname(&self) -> Option<String>;

    fn require_env(&self, name: &str) -> Result<String, HostError> {
        self.get_env(name)
            .ok_or_else(|| HostError::NotFound(name.to_owned()))
    }
}

/// parse a numeric environment value
pub fn parse_id(name: &str, value: String) -> Result<u32, HostError> {
    value.trim().parse().map_err(|_| HostError::Invalid {
        name: name.to_owned(),
        value,
    })
}

/// Fixed host description, stands in for the job launcher in tests and tooling
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    pub env: BTreeMap<String, String>,
    pub rank: u32,
    pub global_rank: u32,
    pub total_tasks: Option<u32>,
    pub pid: u32,
    pub hostname: Option<String>,
}

impl StaticHost {
    pub fn with_env(mut self, name: &str, value: impl Into<String>) -> Self {
        self.env.insert(name.to_owned(), value.into());
        self
    }
}

impl JobHost for StaticHost {
    fn get_env(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn task_rank(&self) -> Result<u32, HostError> {
        Ok(self.rank)
    }

    fn task_global_rank(&self) -> Result<u32, HostError> {
        Ok(self.global_rank)
    }

    fn total_task_count(&self) -> Result<u32, HostError> {
        self.total_tasks
            .ok_or_else(|| HostError::NotFound("task count".to_owned()))
    }

    fn task_pid(&self) -> Result<u32, HostError> {
        Ok(self.pid)
    }

    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }
}
