pub mod local;

use crate::{
    config::{check_executable, ProfilerConfig},
    distributed::{RegistryError, SessionStore, SharedRegistry},
    session::Session,
    sync::{poll_until, PollSettings, SyncError},
};
use itertools::Itertools;
use std::{
    convert::Infallible,
    env,
    ffi::{OsStr, OsString},
    io,
    num::NonZeroU32,
    path::{Path, PathBuf},
    thread,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub use local::LocalProcesses;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Profiler {0:?} was not found in the task search path")]
    NotFound(PathBuf),
    #[error("No participant pids to profile")]
    NoTargets,
    #[error("Failed to prepare the output directory: {0}")]
    OutputDir(#[source] RegistryError),
    #[error("Failed to remove job_done left behind by an earlier step: {0}")]
    StaleSentinel(#[source] RegistryError),
    #[error("Failed to spawn profiler {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Profiler runs as pid {pid} but could not be recorded: {source}")]
    Record {
        pid: u32,
        #[source]
        source: RegistryError,
    },
}

/// Fully resolved invocation of the external profiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    pub env: Vec<(OsString, OsString)>,
    // receives stdout and stderr, discarded otherwise
    pub log: Option<PathBuf>,
}

/// Record of a launched profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilerHandle {
    pub pid: u32,
}

/// Process management as needed by the launcher and the shutdown
pub trait ProcessControl {
    /// start `command` without waiting for it, returns its pid
    fn spawn_detached(&self, command: &ProfilerCommand) -> io::Result<u32>;

    fn is_alive(&self, pid: u32) -> bool;

    /// block until `pid` is gone
    fn wait_for_exit(&self, pid: u32, settings: &PollSettings) -> Result<(), SyncError> {
        poll_for_exit(self, pid, settings)
    }
}

/// poll `is_alive` until `pid` is gone
pub fn poll_for_exit<P: ProcessControl + ?Sized>(
    processes: &P,
    pid: u32,
    settings: &PollSettings,
) -> Result<(), SyncError> {
    let what = format!("profiler {pid} to exit");

    match poll_until::<Infallible>(&what, settings, || Ok(!processes.is_alive(pid))) {
        Ok(outcome) => outcome.map(drop),
        Err(never) => match never {},
    }
}

/// find `exec` in `search_path` unless it already is a path
pub fn resolve_executable(exec: &Path, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if exec.components().count() > 1 {
        return exec.is_file().then(|| exec.to_path_buf());
    }

    let fallback = env::var_os("PATH");
    let search_path = search_path.or(fallback.as_deref())?;

    env::split_paths(search_path)
        .map(|dir| dir.join(exec))
        .find(|candidate| matches!(check_executable(candidate), Ok(true)))
}

/// build the profiler invocation for the given, sorted and deduplicated, pids
///
/// Equivalent to `<profiler> [params..] --pids <pids> --frequency <Hz> [--ranks <list>] -o <dir>`.
pub fn build_command(
    session: &Session,
    config: &ProfilerConfig,
    output_dir: &Path,
    pids: &[u32],
    frequency: NonZeroU32,
) -> Result<ProfilerCommand, LaunchError> {
    let program = resolve_executable(&config.exec, session.search_path.as_deref())
        .ok_or_else(|| LaunchError::NotFound(config.exec.clone()))?;

    let mut args = config.params.iter().map(OsString::from).collect_vec();
    args.push("--pids".into());
    args.push(pids.iter().join(",").into());
    args.push("--frequency".into());
    args.push(frequency.to_string().into());

    if let Some(ranks) = session.ranks.expression() {
        args.push("--ranks".into());
        args.push(ranks.into());
    }

    args.push("-o".into());
    args.push(output_dir.as_os_str().to_owned());

    let env = session
        .search_path
        .iter()
        .map(|path| (OsString::from("PATH"), path.clone()))
        .collect();

    Ok(ProfilerCommand {
        program,
        args,
        working_dir: output_dir.to_path_buf(),
        env,
        log: config.log.as_ref().map(|log| output_dir.join(log)),
    })
}

/// launch the profiler for `pids` and record its pid in the profiler registry
#[instrument(skip(session, store, processes, config), level = "info")]
pub fn launch<S: SessionStore, P: ProcessControl + ?Sized>(
    session: &Session,
    store: &S,
    processes: &P,
    config: &ProfilerConfig,
    pids: &[u32],
    frequency: NonZeroU32,
) -> Result<ProfilerHandle, LaunchError> {
    let targets = pids.iter().copied().sorted_unstable().dedup().collect_vec();

    if targets.len() != pids.len() {
        warn!(
            "{} duplicate pids were dropped, tasks on different nodes share a pid",
            pids.len() - targets.len()
        );
    }

    if targets.is_empty() {
        return Err(LaunchError::NoTargets);
    }

    store.prepare().map_err(LaunchError::OutputDir)?;

    // a profiler that outlived an earlier shutdown leaves job_done behind, ours would quit at once
    if store.is_done() {
        warn!("Removing job_done left behind by an earlier step");
    }
    store.clear_done().map_err(LaunchError::StaleSentinel)?;

    let command = build_command(session, config, store.output_dir(), &targets, frequency)?;
    debug!(command = ?command, "Prepared profiler command");

    // the profiler must not attach before freshly started tasks spawned their threads
    if !config.start_delay().is_zero() {
        debug!("Delaying profiler start by {:?}", config.start_delay());
        thread::sleep(config.start_delay());
    }

    let pid = processes
        .spawn_detached(&command)
        .map_err(|source| LaunchError::Spawn {
            program: command.program.clone(),
            source,
        })?;

    info!(
        "Started profiler {} as pid {pid} for {} tasks at {frequency}Hz",
        command.program.to_string_lossy(),
        targets.len()
    );

    store
        .profilers()
        .register(pid, None)
        .map_err(|source| LaunchError::Record { pid, source })?;

    Ok(ProfilerHandle { pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        distributed::MemoryStore,
        options::{Frequency, ProfilingOptions},
        ranks::RankSelection,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingProcesses {
        spawned: Mutex<Vec<ProfilerCommand>>,
        fail: bool,
    }

    impl ProcessControl for RecordingProcesses {
        fn spawn_detached(&self, command: &ProfilerCommand) -> io::Result<u32> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "no fork"));
            }

            self.spawned.lock().push(command.clone());

            Ok(4711)
        }

        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    fn session(ranks: Option<&str>) -> Session {
        let options = ProfilingOptions {
            frequency: Frequency::Hz(NonZeroU32::new(50).unwrap()),
            ranks: RankSelection::from_option(ranks).unwrap(),
        };

        Session::new("99", "/scratch", &options, 8).with_search_path(env::var_os("PATH"))
    }

    fn config() -> ProfilerConfig {
        ProfilerConfig {
            exec: PathBuf::from("sh"),
            params: vec!["-c".to_owned(), "true".to_owned()],
            start_delay: 0,
            log: Some(PathBuf::from("profiler.log")),
        }
    }

    fn args(command: &ProfilerCommand) -> Vec<String> {
        command
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_carries_pids_frequency_ranks_and_output() {
        let session = session(Some("0,3-5"));
        let command = build_command(
            &session,
            &config(),
            Path::new("/scratch/perf_99"),
            &[3, 20, 100],
            NonZeroU32::new(50).unwrap(),
        )
        .unwrap();

        assert!(command.program.ends_with("sh"));
        assert_eq!(
            args(&command),
            [
                "-c",
                "true",
                "--pids",
                "3,20,100",
                "--frequency",
                "50",
                "--ranks",
                "0,3-5",
                "-o",
                "/scratch/perf_99"
            ]
        );
        assert_eq!(command.working_dir, PathBuf::from("/scratch/perf_99"));
        assert_eq!(
            command.log,
            Some(PathBuf::from("/scratch/perf_99/profiler.log"))
        );
        assert_eq!(command.env.len(), 1);
    }

    #[test]
    fn all_ranks_omit_rank_argument() {
        let command = build_command(
            &session(None),
            &config(),
            Path::new("/out"),
            &[1],
            NonZeroU32::new(10).unwrap(),
        )
        .unwrap();

        assert!(!args(&command).contains(&"--ranks".to_owned()));
    }

    #[test]
    fn unknown_profiler_is_reported() {
        let mut config = config();
        config.exec = PathBuf::from("surely-not-an-installed-profiler");

        assert!(matches!(
            build_command(
                &session(None),
                &config,
                Path::new("/out"),
                &[1],
                NonZeroU32::new(10).unwrap()
            ),
            Err(LaunchError::NotFound(_))
        ));
    }

    #[test]
    fn launch_sorts_dedups_and_records_pid() {
        let store = MemoryStore::new("/scratch/perf_99");
        let processes = RecordingProcesses::default();

        let handle = launch(
            &session(None),
            &store,
            &processes,
            &config(),
            &[30, 4, 30, 1000],
            NonZeroU32::new(50).unwrap(),
        )
        .unwrap();

        assert_eq!(handle, ProfilerHandle { pid: 4711 });
        assert_eq!(store.profilers().enumerate().unwrap(), vec![4711]);

        let spawned = processes.spawned.lock();
        assert_eq!(spawned.len(), 1);
        assert!(args(&spawned[0]).contains(&"4,30,1000".to_owned()));
    }

    #[test]
    fn stale_job_done_is_removed_before_spawning() {
        let store = MemoryStore::new("/scratch/perf_99");
        store.signal_done().unwrap();

        launch(
            &session(None),
            &store,
            &RecordingProcesses::default(),
            &config(),
            &[1, 2],
            NonZeroU32::new(50).unwrap(),
        )
        .unwrap();

        assert!(!store.is_done());
    }

    #[test]
    fn spawn_failure_is_a_launch_error() {
        let store = MemoryStore::new("/out");
        let processes = RecordingProcesses {
            fail: true,
            ..Default::default()
        };

        assert!(matches!(
            launch(
                &session(None),
                &store,
                &processes,
                &config(),
                &[1],
                NonZeroU32::new(50).unwrap()
            ),
            Err(LaunchError::Spawn { .. })
        ));
        assert!(store.profilers().enumerate().unwrap().is_empty());
    }

    #[test]
    fn nothing_to_profile() {
        assert!(matches!(
            launch(
                &session(None),
                &MemoryStore::new("/out"),
                &RecordingProcesses::default(),
                &config(),
                &[],
                NonZeroU32::new(50).unwrap()
            ),
            Err(LaunchError::NoTargets)
        ));
    }
}
