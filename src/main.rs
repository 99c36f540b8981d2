//! Dose3D runner CLI
//!
//! Entry point for the `dose3d-runner` command-line tool. Besides the
//! polling loop itself, the subcommands expose the operations the web
//! layer performs against the shared job tree, which makes the queue
//! operable from a shell for testing and recovery.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;

use chrono::Utc;
use clap::{Parser, Subcommand};

use dose3d_runner::{Config, JobState, JobStatus, JobsManager, LogSink, PidCheck, Runner};

#[derive(Parser)]
#[command(name = "dose3d-runner")]
#[command(about = "Filesystem queue runner for Dose3D simulation jobs", version)]
struct Cli {
    /// Path to the KEY=VALUE config file
    #[arg(long, short = 'c', default_value = "config.txt", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the queue and execute jobs until interrupted
    Run,

    /// Validate the configuration and startup preconditions
    Check,

    /// Enqueue a job payload
    Submit {
        /// Job identifier, unique across all lifecycle states
        id: String,

        /// TOML payload file
        #[arg(long)]
        toml: PathBuf,

        /// Extra command-line arguments for the executable
        #[arg(long, default_value = "")]
        args: String,

        /// Leave the job unready instead of flagging it consumable
        #[arg(long)]
        no_ready: bool,
    },

    /// Flag a queued job as consumable
    Ready { id: String },

    /// Withdraw a ready job from the queue
    Dequeue { id: String },

    /// Show a job's status
    Status {
        id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List queued and running jobs
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print a job's captured process log
    Logs { id: String },

    /// Remove a job's files in any state
    Purge { id: String },

    /// Kill a job's running process
    Kill { id: String },
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Run => run_loop(&config),
        Commands::Check => run_check(&cli.config, &config),
        Commands::Submit {
            id,
            toml,
            args,
            no_ready,
        } => run_submit(&config, &id, &toml, &args, !no_ready),
        Commands::Ready { id } => run_ready(&config, &id),
        Commands::Dequeue { id } => run_dequeue(&config, &id),
        Commands::Status { id, json } => run_status(&config, &id, json),
        Commands::List { json } => run_list(&config, json),
        Commands::Logs { id } => run_logs(&config, &id),
        Commands::Purge { id } => run_purge(&config, &id),
        Commands::Kill { id } => run_kill(&config, &id),
    }
}

/// Console sink: every line the runner or a job produces, stamped in UTC.
fn console_sink() -> impl FnMut(&str) {
    |line: &str| println!("[{}] {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"), line)
}

fn run_loop(config: &Config) {
    let runner = Runner::new(config);
    if let Err(e) = runner.preflight() {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    let stop = runner.stop_flag();
    if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
        eprintln!("Error installing signal handler: {e}");
        process::exit(1);
    }

    let mut sink = console_sink();
    sink.line("Start queue crawler loop");
    runner.run(&mut sink);
    sink.line("Stopped");
}

fn run_check(path: &Path, config: &Config) {
    println!("Config loaded from: {}", path.display());
    println!("  QUEUE_DIR   = {}", config.queue_dir.display());
    println!("  RUNNING_DIR = {}", config.running_dir.display());
    println!("  DONE_DIR    = {}", config.done_dir.display());
    println!("  DOSE3D_EXEC = {}", config.exec.display());
    println!("  SLEEP       = {}", config.sleep_secs);
    println!("  CACHE_DIR   = {}", config.cache_dir.display());

    match Runner::new(config).preflight() {
        Ok(()) => println!("Preconditions satisfied"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_submit(config: &Config, id: &str, toml_path: &Path, args: &str, ready: bool) {
    let payload = match std::fs::read_to_string(toml_path) {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("Error reading {}: {e}", toml_path.display());
            process::exit(1);
        }
    };
    if let Err(e) = payload.parse::<toml::Value>() {
        eprintln!("Error: payload is not valid TOML: {e}");
        process::exit(1);
    }

    let jobs = JobsManager::new(config);
    if let Err(e) = jobs.init_dirs() {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    // Identifier collisions are the submitter's problem to avoid; catch
    // the obvious case here.
    if jobs.get_status(id).is_ok() {
        eprintln!("Error: job {id} already exists");
        process::exit(1);
    }

    match jobs.get_job(id).flush_to_queue(&payload, args, ready) {
        Ok(()) => println!(
            "Job {id} queued{}",
            if ready { " and marked ready" } else { "" }
        ),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_ready(config: &Config, id: &str) {
    match JobsManager::new(config).get_job(id).mark_ready() {
        Ok(()) => println!("Job {id} marked ready"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_dequeue(config: &Config, id: &str) {
    match JobsManager::new(config).get_job(id).dequeue() {
        Ok(()) => println!("Job {id} withdrawn from queue"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_status(config: &Config, id: &str, json: bool) {
    match JobsManager::new(config).get_status(id) {
        Ok(status) => print_status(&status, json),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_list(config: &Config, json: bool) {
    let jobs = JobsManager::new(config);
    let mut statuses: Vec<JobStatus> = Vec::new();

    let listing = jobs.jobs_in_queue().and_then(|queued| {
        for entry in queued {
            if let Ok(status) = entry.job.status() {
                statuses.push(status);
            }
        }
        Ok(jobs.running_jobs()?)
    });
    match listing {
        Ok(running) => {
            for job in running {
                if let Ok(status) = job.status() {
                    statuses.push(status);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }

    if json {
        match serde_json::to_string_pretty(&statuses) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error serializing output: {e}");
                process::exit(1);
            }
        }
    } else {
        for status in &statuses {
            print_status(status, false);
        }
        if statuses.is_empty() {
            println!("No jobs in queue or running");
        }
    }
}

fn print_status(status: &JobStatus, json: bool) {
    if json {
        match serde_json::to_string_pretty(status) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error serializing output: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let mut line = format!("{}  {}", status.job_id, status.state);
    if status.state == JobState::Queued {
        line.push_str(if status.ready { " (ready)" } else { " (not ready)" });
    }
    if let Some(pid) = status.pid {
        line.push_str(&format!("  pid={pid}"));
    }
    if let Some(code) = status.exit_code {
        line.push_str(&format!("  exit_code={code}"));
    }
    println!("{line}");
}

fn run_logs(config: &Config, id: &str) {
    match JobsManager::new(config).get_job(id).load_log() {
        Ok(log) => print!("{log}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_purge(config: &Config, id: &str) {
    let jobs = JobsManager::new(config);
    let job = jobs.get_job(id);

    // Core contract: never purge a job whose process is still alive.
    if let Ok(status) = job.status() {
        if status.state == JobState::Running {
            if let Some(pid) = status.pid {
                if jobs.check_pid(pid) == PidCheck::Matches {
                    eprintln!("Error: job {id} is still running (pid {pid}), kill it first");
                    process::exit(1);
                }
            }
        }
    }

    match job.purge() {
        Ok(()) => println!("Job {id} purged"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_kill(config: &Config, id: &str) {
    let jobs = JobsManager::new(config);
    let job = jobs.get_job(id);
    match jobs.kill_job(&job) {
        Ok(true) => println!("Kill signal sent to job {id}"),
        Ok(false) => println!("Job {id} has no matching live process"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
