//! The polling loop: orphan reconciliation, dispatch, idle.
//!
//! Single-threaded and cooperative. At most one job is ever RUNNING; the
//! loop blocks for a job's entire runtime and only then looks at the queue
//! again. Job-level failures are reported through the sink and never end
//! the loop; only startup preconditions are fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::job::{Job, JobError};
use crate::queue::{JobsManager, PidCheck};
use crate::supervisor::{LogSink, Supervisor, SupervisorError};

/// Allowed poll interval, in seconds.
pub const SLEEP_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

/// Granularity at which sleeps re-check the stop flag.
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wires the queue manager and the process supervisor into the poll loop.
pub struct Runner {
    config: Config,
    jobs: JobsManager,
    supervisor: Supervisor,
    stop: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            jobs: JobsManager::new(config),
            supervisor: Supervisor::new(config.exec.clone()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn jobs(&self) -> &JobsManager {
        &self.jobs
    }

    /// Flag shared with signal handlers; raising it ends [`Runner::run`]
    /// after the current poll cycle.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Startup checks, fatal on violation: state roots exist or are
    /// created, the executable exists, and the poll interval is sane.
    pub fn preflight(&self) -> Result<(), RunnerError> {
        self.jobs.init_dirs()?;
        if !self.config.exec.exists() {
            return Err(RunnerError::Precondition(format!(
                "executable {} not found",
                self.config.exec.display()
            )));
        }
        if !SLEEP_RANGE.contains(&self.config.sleep_secs) {
            return Err(RunnerError::Precondition(format!(
                "SLEEP should be between {} and {}, got {}",
                SLEEP_RANGE.start(),
                SLEEP_RANGE.end(),
                self.config.sleep_secs
            )));
        }
        Ok(())
    }

    /// Finish every job left in the running root by a previous runner
    /// process.
    ///
    /// A pid marker naming a live matching process is waited out first,
    /// sleep-polling at the configured interval. An absent marker, a dead
    /// process, or a reused PID all mean the process is already gone. The
    /// job moves to DONE in every branch; nothing is killed here.
    pub fn reconcile_orphans(&self, sink: &mut dyn LogSink) -> Result<(), RunnerError> {
        for job in self.jobs.running_jobs()? {
            if let Some(pid) = job.pid()? {
                sink.line(&format!(
                    "Found orphaned running job {} with pid {pid}",
                    job.id()
                ));
                while self.jobs.check_pid(pid) == PidCheck::Matches {
                    if self.stopped() {
                        // Leave the job for the next runner start.
                        return Ok(());
                    }
                    self.idle();
                }
                // The process is gone; the marker must not survive into
                // the done root.
                let _ = std::fs::remove_file(self.jobs.dirs().pid_file(job.id()));
            } else {
                sink.line(&format!("Found orphaned running job {}", job.id()));
            }
            job.finish()?;
            sink.line(&format!("Moved orphaned job {} to done", job.id()));
        }
        Ok(())
    }

    /// One pass of the loop: reconcile orphans, then dispatch at most one
    /// ready job. Returns whether a job was executed.
    ///
    /// Dispatch is first-ready-wins: the oldest ready queue entry runs,
    /// not-ready entries ahead of it are skipped without blocking it.
    pub fn poll_once(&self, sink: &mut dyn LogSink) -> Result<bool, RunnerError> {
        self.reconcile_orphans(sink)?;

        let mut picked: Option<Job> = None;
        for entry in self.jobs.jobs_in_queue()? {
            if entry.ready {
                picked = Some(entry.job);
                break;
            }
            sink.line(&format!(
                "Found new job {} but it is not ready yet",
                entry.job.id()
            ));
        }
        let Some(job) = picked else {
            return Ok(false);
        };

        sink.line(&format!("Found new ready job: {}", job.id()));
        job.start()?;
        let code = self.supervisor.run(&job, sink)?;
        job.finish()?;
        sink.line(&format!("Job {} done with code {code}", job.id()));
        Ok(true)
    }

    /// Poll until the stop flag is raised. Per-job failures are reported
    /// through the sink and the loop keeps going.
    pub fn run(&self, sink: &mut dyn LogSink) {
        while !self.stopped() {
            if let Err(e) = self.poll_once(sink) {
                sink.line(&format!("Error: {e}"));
            }
            self.idle();
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleep one poll interval, in short slices so a stop request is
    /// honored promptly.
    fn idle(&self) {
        let mut remaining = Duration::from_secs(self.config.sleep_secs);
        while !remaining.is_zero() && !self.stopped() {
            let slice = remaining.min(STOP_POLL);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(tmp: &tempfile::TempDir, sleep_secs: u64) -> Config {
        Config {
            queue_dir: tmp.path().join("queue"),
            running_dir: tmp.path().join("running"),
            done_dir: tmp.path().join("done"),
            exec: tmp.path().join("dose3d"),
            sleep_secs,
            cache_dir: tmp.path().join("cache"),
        }
    }

    #[test]
    fn test_preflight_creates_dirs_and_checks_exec() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, 1);
        let runner = Runner::new(&cfg);

        let err = runner.preflight().unwrap_err();
        assert!(matches!(err, RunnerError::Precondition(_)));
        assert!(cfg.queue_dir.is_dir());

        fs::write(&cfg.exec, b"").unwrap();
        runner.preflight().unwrap();
    }

    #[test]
    fn test_preflight_rejects_out_of_range_sleep() {
        let tmp = tempfile::tempdir().unwrap();
        for sleep_secs in [0, 3601] {
            let cfg = config(&tmp, sleep_secs);
            fs::write(&cfg.exec, b"").unwrap();
            let err = Runner::new(&cfg).preflight().unwrap_err();
            assert!(matches!(err, RunnerError::Precondition(_)));
        }
    }

    #[test]
    fn test_poll_once_idle_on_empty_queue() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, 1);
        let runner = Runner::new(&cfg);
        fs::write(&cfg.exec, b"").unwrap();
        runner.preflight().unwrap();

        let mut sink = |_: &str| {};
        assert!(!runner.poll_once(&mut sink).unwrap());
    }

    #[test]
    fn test_not_ready_jobs_are_skipped_without_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, 1);
        let runner = Runner::new(&cfg);
        fs::write(&cfg.exec, b"").unwrap();
        runner.preflight().unwrap();

        runner
            .jobs()
            .get_job("j1")
            .flush_to_queue("[sim]\n", "", false)
            .unwrap();

        let mut lines = Vec::new();
        let mut sink = |line: &str| lines.push(line.to_string());
        assert!(!runner.poll_once(&mut sink).unwrap());
        assert!(lines.iter().any(|l| l.contains("not ready yet")));
    }

    #[test]
    fn test_orphan_without_pid_moves_to_done() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, 1);
        let runner = Runner::new(&cfg);
        fs::write(&cfg.exec, b"").unwrap();
        runner.preflight().unwrap();

        let job = runner.jobs().get_job("orphan");
        job.flush_to_queue("[sim]\n", "", true).unwrap();
        job.start().unwrap();

        let mut sink = |_: &str| {};
        runner.reconcile_orphans(&mut sink).unwrap();

        assert_eq!(
            job.status().unwrap().state,
            crate::state::JobState::Done
        );
        assert!(!cfg.running_dir.join("orphan").exists());
    }

    #[test]
    fn test_orphan_with_dead_pid_moves_to_done() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp, 1);
        let runner = Runner::new(&cfg);
        fs::write(&cfg.exec, b"").unwrap();
        runner.preflight().unwrap();

        let job = runner.jobs().get_job("orphan");
        job.flush_to_queue("[sim]\n", "", true).unwrap();
        job.start().unwrap();
        fs::write(runner.jobs().dirs().pid_file("orphan"), i32::MAX.to_string()).unwrap();

        let mut sink = |_: &str| {};
        runner.reconcile_orphans(&mut sink).unwrap();

        assert_eq!(
            job.status().unwrap().state,
            crate::state::JobState::Done
        );
        // The stale marker did not travel into the done root.
        assert!(!cfg.done_dir.join("orphan/pid").exists());
    }
}
