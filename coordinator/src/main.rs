use clap::{Args, Parser, Subcommand};
use lpprof_coordinator::{
    config::CoordinatorConfig,
    executors::LocalProcesses,
    hooks::{on_task_exit, on_task_init, HookError, Outcome},
    host::SlurmHost,
    options::{Frequency, ProfilingOptions},
    ranks::RankSelection,
};
use std::{
    ffi::OsString,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Command as Process, ExitCode},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Profile the tasks of a job step with a single sampling profiler
#[derive(Parser, Debug)]
#[command(name = "lpprof", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "LPPROF_CONFIG")]
    config: Option<PathBuf>,

    /// Logging verbosity (trace, debug, info, warn, error), RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct ProfilingArgs {
    /// Sampling frequency in Hz, or `off`
    #[arg(long, env = "LPPROF_FREQUENCY")]
    frequency: Option<Frequency>,

    /// Ranks to profile, e.g. `0,3-7,9`; all ranks when omitted
    #[arg(long, env = "LPPROF_RANKS")]
    ranks: Option<RankSelection>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register this task, the coordinating task also launches the profiler
    TaskInit(ProfilingArgs),
    /// Finish profiling for this task, the coordinating task waits for the profiler
    TaskExit(ProfilingArgs),
    /// Run a program as a profiled task
    Run {
        #[command(flatten)]
        profiling: ProfilingArgs,

        /// Program and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        program: Vec<OsString>,
    },
}

impl ProfilingArgs {
    fn options(&self) -> ProfilingOptions {
        ProfilingOptions {
            frequency: self.frequency.unwrap_or_default(),
            ranks: self.ranks.clone().unwrap_or_default(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::TaskInit(args) => hook(&cli, args, on_task_init),
        Command::TaskExit(args) => hook(&cli, args, on_task_exit),
        Command::Run { profiling, program } => run(&cli, profiling, program),
    }
}

type Hook = fn(
    &SlurmHost,
    &ProfilingOptions,
    &CoordinatorConfig,
    &LocalProcesses,
) -> Result<Outcome, HookError>;

fn load_config(cli: &Cli) -> Option<CoordinatorConfig> {
    match CoordinatorConfig::load(cli.config.as_deref())
        .and_then(|config| config.preflight_checks().map(|()| config))
    {
        Ok(config) => Some(config),
        Err(error) => {
            error!("Failed to load configuration: {error}");

            None
        }
    }
}

fn exit_code(result: Result<Outcome, HookError>) -> ExitCode {
    match result {
        Ok(outcome) => {
            debug!(outcome = ?outcome, "Hook finished");

            ExitCode::SUCCESS
        }
        // only fatal errors make it this far, see `hooks::contain`
        Err(_) => ExitCode::FAILURE,
    }
}

fn hook(cli: &Cli, args: &ProfilingArgs, task_hook: Hook) -> ExitCode {
    let options = args.options();

    if !options.frequency.is_enabled() {
        debug!("Profiling is disabled");

        return ExitCode::SUCCESS;
    }

    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    exit_code(task_hook(
        &SlurmHost::new(),
        &options,
        &config,
        &LocalProcesses::new(),
    ))
}

// exit hook failures never change the exit code of the wrapped program
fn task_exit(
    host: &SlurmHost,
    options: &ProfilingOptions,
    config: &CoordinatorConfig,
    processes: &LocalProcesses,
) {
    match on_task_exit(host, options, config, processes) {
        Ok(outcome) => debug!(outcome = ?outcome, "Exit hook finished"),
        Err(error) => warn!("Exit hook failed: {error}"),
    }
}

/// spawn `program` as the profiled task and wrap it in the init and exit hooks
fn run(cli: &Cli, args: &ProfilingArgs, program: &[OsString]) -> ExitCode {
    let options = args.options();

    let config = if options.frequency.is_enabled() {
        match load_config(cli) {
            Some(config) => Some(config),
            None => return ExitCode::FAILURE,
        }
    } else {
        None
    };

    let Some((executable, arguments)) = program.split_first() else {
        return ExitCode::FAILURE;
    };

    let mut child = match Process::new(executable).args(arguments).spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start {}: {e}", executable.to_string_lossy());

            return ExitCode::from(127);
        }
    };

    let host = SlurmHost::with_task_pid(child.id());
    let processes = LocalProcesses::new();

    if let Some(config) = &config {
        if on_task_init(&host, &options, config, &processes).is_err() {
            // the step is aborted, the task must not keep running without its siblings
            if let Err(e) = child.kill() {
                error!("Failed to stop {}: {e}", executable.to_string_lossy());
            }

            match child.wait() {
                Ok(status) => debug!("{} stopped with {status}", executable.to_string_lossy()),
                Err(e) => warn!("Failed to reap {}: {e}", executable.to_string_lossy()),
            }

            task_exit(&host, &options, config, &processes);

            return ExitCode::FAILURE;
        }
    }

    let status = child.wait();

    if let Some(config) = &config {
        task_exit(&host, &options, config, &processes);
    }

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            error!("Failed to wait for {}: {e}", executable.to_string_lossy());

            return ExitCode::FAILURE;
        }
    };

    info!("{} exited with {status}", executable.to_string_lossy());

    match status.code() {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        // killed by a signal, mirror the shell convention
        None => ExitCode::from(u8::try_from(128 + status.signal().unwrap_or(0)).unwrap_or(1)),
    }
}
