use crate::{
    config::CoordinatorConfig,
    distributed::{DirectoryStore, RegistryError, SessionStore, SharedRegistry},
    executors::{launch, LaunchError, ProcessControl, ProfilerHandle},
    guard::RateExceeded,
    host::{
        slurm::{JOB_ID, SEARCH_PATH, SUBMIT_DIR},
        HostError, JobHost,
    },
    options::ProfilingOptions,
    session::{Participant, Session},
    shutdown::{finish, ShutdownError},
    sync::{wait_for_all, BarrierError},
};
use std::{ffi::OsString, thread};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Task environment is incomplete: {0}")]
    Host(#[from] HostError),
    #[error("Registry failure: {0}")]
    Registry(#[from] RegistryError),
    #[error("Rendezvous failed: {0}")]
    Barrier(#[from] BarrierError),
    #[error("Profiler launch failed: {0}")]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    RateExceeded(#[from] RateExceeded),
    #[error("Shutdown incomplete: {0}")]
    Shutdown(#[from] ShutdownError),
}

impl HookError {
    /// only a rate violation is allowed to fail the job step
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RateExceeded(_))
    }
}

/// What a hook did for the calling task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(&'static str),
    Registered,
    Launched(ProfilerHandle),
    Finished,
    Released,
    // profiling failed, the task goes on without it
    Degraded,
}

/// Everything a hook needs for one task of one step
pub struct Step<'a, S, P: ?Sized> {
    pub session: &'a Session,
    pub participant: &'a Participant,
    pub store: &'a S,
    pub processes: &'a P,
    pub config: &'a CoordinatorConfig,
}

impl<'a, S: SessionStore, P: ProcessControl + ?Sized> Step<'a, S, P> {
    fn skip_reason(&self) -> Option<&'static str> {
        if !self.session.is_enabled() {
            Some("profiling is disabled")
        } else if !self.session.selects(self.participant) {
            Some("rank is not selected")
        } else {
            None
        }
    }

    fn discard_registrations(&self) {
        for registry in [self.store.participants(), self.store.profilers()] {
            if let Err(error) = registry.clear() {
                warn!(error = ?error, "Failed to discard registrations: {error}");
            }
        }
    }

    /// register the task, the coordinator additionally waits for all tasks and starts the profiler
    #[instrument(skip(self), fields(rank = self.participant.global_rank, pid = self.participant.pid), level = "debug")]
    pub fn task_init(&self) -> Result<Outcome, HookError> {
        if let Some(reason) = self.skip_reason() {
            debug!("Not profiling this task: {reason}");

            return Ok(Outcome::Skipped(reason));
        }

        let Some(frequency) = self.session.frequency.hz() else {
            return Ok(Outcome::Skipped("profiling is disabled"));
        };

        self.store.prepare()?;

        let tag = self
            .config
            .registry
            .tag_entries
            .then(|| self.participant.tag())
            .flatten();

        self.store
            .participants()
            .register(self.participant.pid, tag.as_deref())?;

        debug!("Registered pid {}", self.participant.pid);

        if !self.session.is_coordinator(self.participant) {
            return Ok(Outcome::Registered);
        }

        let expected = self.session.expected_participants();
        info!("Coordinating profiling of {expected} tasks");

        wait_for_all(
            self.store.participants(),
            expected,
            &self.config.barrier.poll_settings(),
        )?;

        let pids = self.store.participants().enumerate()?;

        if let Err(exceeded) = self.config.guard.rate_guard().check(
            frequency.get(),
            pids.len(),
            self.config.guard.sample_size,
            self.config.guard.window,
        ) {
            // the step is aborted, later steps of the job reuse the output directory
            self.discard_registrations();

            return Err(exceeded.into());
        }

        let handle = launch(
            self.session,
            self.store,
            self.processes,
            &self.config.profiler,
            &pids,
            frequency,
        )?;

        Ok(Outcome::Launched(handle))
    }

    /// the coordinator shuts the profiler down, every other task only lingers for a moment
    #[instrument(skip(self), fields(rank = self.participant.global_rank, pid = self.participant.pid), level = "debug")]
    pub fn task_exit(&self) -> Result<Outcome, HookError> {
        if let Some(reason) = self.skip_reason() {
            return Ok(Outcome::Skipped(reason));
        }

        if self.session.is_coordinator(self.participant) {
            finish(
                self.store,
                self.processes,
                &self.config.shutdown.poll_settings(),
            )?;

            return Ok(Outcome::Finished);
        }

        // TODO: replace the fixed sleep once the profiler publishes a flush marker
        let grace = self.config.shutdown.grace_period();

        if !grace.is_zero() {
            debug!("Waiting {grace:?} for the profiler to flush");
            thread::sleep(grace);
        }

        Ok(Outcome::Released)
    }
}

/// profiling is auxiliary: everything except a rate violation is logged and swallowed
pub fn contain(result: Result<Outcome, HookError>) -> Result<Outcome, HookError> {
    match result {
        Err(error) if error.is_fatal() => {
            error!("{error}");

            Err(error)
        }
        Err(error) => {
            warn!(error = ?error, "Profiling abandoned for this step: {error}");

            Ok(Outcome::Degraded)
        }
        outcome => outcome,
    }
}

/// build the session and the calling participant from the job launcher
pub fn resolve<H: JobHost + ?Sized>(
    host: &H,
    options: &ProfilingOptions,
) -> Result<(Session, Participant), HostError> {
    let total_tasks = host.total_task_count()?;

    let session = Session::new(
        host.require_env(JOB_ID)?,
        host.require_env(SUBMIT_DIR)?,
        options,
        total_tasks,
    )
    .with_search_path(host.get_env(SEARCH_PATH).map(OsString::from));

    let participant = Participant {
        rank: host.task_rank()?,
        global_rank: host.task_global_rank()?,
        pid: host.task_pid()?,
        hostname: host.hostname(),
    };

    Ok((session, participant))
}

fn run_hook<H, P>(
    host: &H,
    options: &ProfilingOptions,
    config: &CoordinatorConfig,
    processes: &P,
    hook: impl FnOnce(&Step<'_, DirectoryStore, P>) -> Result<Outcome, HookError>,
) -> Result<Outcome, HookError>
where
    H: JobHost + ?Sized,
    P: ProcessControl + ?Sized,
{
    if !options.frequency.is_enabled() {
        return Ok(Outcome::Skipped("profiling is disabled"));
    }

    // the job-level launcher process has no step task count and is never profiled
    if let Err(HostError::NotFound(name)) = host.total_task_count() {
        debug!("{name} is not set, not a task process");

        return Ok(Outcome::Skipped("not a task process"));
    }

    let (session, participant) = match resolve(host, options) {
        Ok(resolved) => resolved,
        Err(error) => return contain(Err(error.into())),
    };

    let store = DirectoryStore::new(session.layout());

    contain(hook(&Step {
        session: &session,
        participant: &participant,
        store: &store,
        processes,
        config,
    }))
}

/// task-init hook
pub fn on_task_init<H, P>(
    host: &H,
    options: &ProfilingOptions,
    config: &CoordinatorConfig,
    processes: &P,
) -> Result<Outcome, HookError>
where
    H: JobHost + ?Sized,
    P: ProcessControl + ?Sized,
{
    run_hook(host, options, config, processes, |step| step.task_init())
}

/// task-exit hook
pub fn on_task_exit<H, P>(
    host: &H,
    options: &ProfilingOptions,
    config: &CoordinatorConfig,
    processes: &P,
) -> Result<Outcome, HookError>
where
    H: JobHost + ?Sized,
    P: ProcessControl + ?Sized,
{
    run_hook(host, options, config, processes, |step| step.task_exit())
}
