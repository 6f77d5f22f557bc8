use super::{poll_for_exit, ProcessControl, ProfilerCommand};
use crate::sync::{PollSettings, SyncError};
use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fs::OpenOptions,
    io,
    os::unix::process::CommandExt,
    process::{Child, Command, Stdio},
};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Processes of the local node
///
/// Children spawned through this instance are kept around so they can be reaped; an exited but
/// unreaped child would otherwise still answer to `kill(pid, 0)`.
#[derive(Debug, Default)]
pub struct LocalProcesses {
    children: Mutex<BTreeMap<u32, Child>>,
}

impl LocalProcesses {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessControl for LocalProcesses {
    fn spawn_detached(&self, command: &ProfilerCommand) -> io::Result<u32> {
        let mut process = Command::new(&command.program);

        process
            .args(&command.args)
            .current_dir(&command.working_dir)
            .envs(command.env.iter().cloned())
            .stdin(Stdio::null())
            // keep the profiler out of the task's process group and its signals
            .process_group(0);

        match &command.log {
            Some(path) => {
                let log = OpenOptions::new().create(true).append(true).open(path)?;
                process.stdout(log.try_clone()?).stderr(log);
            }
            None => {
                process.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = process.spawn()?;
        let pid = child.id();

        self.children.lock().insert(pid, child);

        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut children = self.children.lock();
        let state = children.get_mut(&pid).map(Child::try_wait);

        match state {
            Some(Ok(Some(status))) => {
                debug!("Profiler {pid} exited with {status}");
                children.remove(&pid);

                false
            }
            Some(Ok(None)) => true,
            Some(Err(error)) => {
                warn!(error = ?error, "Failed to query child {pid}, falling back to signals");

                signal_alive(pid)
            }
            None => signal_alive(pid),
        }
    }

    fn wait_for_exit(&self, pid: u32, settings: &PollSettings) -> Result<(), SyncError> {
        let owned = self.children.lock().remove(&pid);

        let Some(mut child) = owned else {
            return poll_for_exit(self, pid, settings);
        };

        match child.wait_timeout(settings.timeout) {
            Ok(Some(status)) => {
                debug!("Profiler {pid} exited with {status}");

                Ok(())
            }
            Ok(None) => {
                self.children.lock().insert(pid, child);

                Err(SyncError::Timeout {
                    what: format!("profiler {pid} to exit"),
                    waited: settings.timeout,
                })
            }
            Err(error) => {
                warn!(error = ?error, "Failed to wait for child {pid}, falling back to polling");
                self.children.lock().insert(pid, child);

                poll_for_exit(self, pid, settings)
            }
        }
    }
}

/// liveness of a pid not spawned by us
pub fn signal_alive(pid: u32) -> bool {
    // pid 0 and negative pids address process groups
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    if raw == 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // exists, but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(error) => {
            warn!(error = ?error, "Failed to check liveness of {pid}: {error}");

            false
        }
    }
}
