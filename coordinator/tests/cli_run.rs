use lpprof_coordinator::{
    config::CoordinatorConfig,
    host::slurm::{JOB_ID, LOCAL_ID, NODE_NAME, PROC_ID, STEP_TASKS, SUBMIT_DIR, TASK_PID},
};
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Output},
    time::{Duration, Instant},
};
use tempfile::TempDir;

const FAKE_PROFILER: &str = r#"echo "$@" > profile.txt
while [ ! -e job_done ]; do sleep 0.02; done"#;

struct Job {
    submit: TempDir,
    config: PathBuf,
}

impl Job {
    fn new(configure: impl FnOnce(&mut CoordinatorConfig)) -> Self {
        let submit = TempDir::new().unwrap();
        let config_path = submit.path().join("lpprof.yaml");

        let mut config = CoordinatorConfig::default();
        config.profiler.exec = PathBuf::from("sh");
        config.profiler.params = vec![
            "-c".to_owned(),
            FAKE_PROFILER.to_owned(),
            "lpprof-sampler".to_owned(),
        ];
        config.profiler.start_delay = 0;
        config.barrier.poll_interval = 5;
        config.barrier.timeout = 10_000;
        config.shutdown.poll_interval = 5;
        config.shutdown.timeout = 10_000;
        config.shutdown.grace_period = 0;
        configure(&mut config);

        fs::write(&config_path, serde_yaml::to_string(&config).unwrap()).unwrap();

        Self {
            submit,
            config: config_path,
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.submit.path().join("perf_77")
    }

    /// `lpprof run` as the only task of a step
    fn run(&self, profiling: &[&str], program: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_lpprof"))
            .env_clear()
            .env("PATH", env::var_os("PATH").unwrap_or_default())
            .env("LPPROF_CONFIG", &self.config)
            .env(SUBMIT_DIR, self.submit.path())
            .env(JOB_ID, "77")
            .env(STEP_TASKS, "1")
            .env(LOCAL_ID, "0")
            .env(PROC_ID, "0")
            .env(NODE_NAME, "node01")
            // the wrapped program is profiled, not the pid Slurm reports
            .env(TASK_PID, "1")
            .current_dir(self.submit.path())
            .arg("run")
            .args(profiling)
            .arg("--")
            .args(program)
            .output()
            .unwrap()
    }
}

fn names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[test]
fn profiles_the_wrapped_program_and_mirrors_its_exit_code() {
    let job = Job::new(|_| {});

    let output = job.run(
        &["--frequency", "50"],
        &["sh", "-c", "echo $$ > task.pid; exit 3"],
    );

    assert_eq!(output.status.code(), Some(3), "{output:?}");

    let task_pid = fs::read_to_string(job.submit.path().join("task.pid")).unwrap();
    let profile = fs::read_to_string(job.output_dir().join("profile.txt")).unwrap();

    assert_eq!(
        profile.trim(),
        format!(
            "--pids {} --frequency 50 -o {}",
            task_pid.trim(),
            job.output_dir().display()
        )
    );
    assert_eq!(names(&job.output_dir()), vec!["profile.txt".to_owned()]);
}

#[test]
fn signal_exit_follows_shell_convention() {
    let job = Job::new(|_| {});

    let output = job.run(&[], &["sh", "-c", "kill -KILL $$"]);

    assert_eq!(output.status.code(), Some(128 + 9), "{output:?}");
    // profiling is off without a frequency
    assert!(!job.output_dir().exists());
}

#[test]
fn rate_violation_stops_the_program_and_cleans_up() {
    let job = Job::new(|config| config.guard.limit_mb_per_minute = 0.001);
    let start = Instant::now();

    let output = job.run(&["--frequency", "50"], &["sleep", "30"]);

    assert_eq!(output.status.code(), Some(1), "{output:?}");
    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(String::from_utf8_lossy(&output.stderr).contains("shared filesystem limit"));
    assert!(names(&job.output_dir()).is_empty());
}

#[test]
fn unknown_program_exits_127() {
    let job = Job::new(|_| {});

    let output = job.run(&["--frequency", "off"], &["surely-not-an-installed-program"]);

    assert_eq!(output.status.code(), Some(127), "{output:?}");
}
