//! Deterministic on-disk locations for job artifacts.
//!
//! Queue-root artifacts are flat files prefixed with the job id; running
//! and done jobs own a dedicated subdirectory. This layout is shared with
//! the web layer and must not change.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::state::JobState;

/// Process-id marker, present only while the external process is alive.
pub const PID_FILE: &str = "pid";
/// Combined stdout/stderr capture, append-only.
pub const LOG_FILE: &str = "log.txt";
/// Exit-code marker, present once the external process has terminated.
pub const RET_CODE_FILE: &str = "ret_code.txt";

/// The three state roots shared with the enqueuing web layer.
#[derive(Debug, Clone)]
pub struct StateDirs {
    pub queue: PathBuf,
    pub running: PathBuf,
    pub done: PathBuf,
}

impl StateDirs {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.queue_dir.clone(),
            running: config.running_dir.clone(),
            done: config.done_dir.clone(),
        }
    }

    /// Base directory for a state. INIT shares the queue root.
    pub fn root_for(&self, state: JobState) -> &Path {
        match state {
            JobState::Init | JobState::Queued => &self.queue,
            JobState::Running => &self.running,
            JobState::Done => &self.done,
        }
    }

    /// Directory holding a job's artifacts in the given state. Queued jobs
    /// live flat in the queue root; running and done jobs get `{root}/{id}`.
    pub fn job_dir(&self, job_id: &str, state: JobState) -> PathBuf {
        match state {
            JobState::Init | JobState::Queued => self.queue.clone(),
            JobState::Running | JobState::Done => self.root_for(state).join(job_id),
        }
    }

    pub fn toml_file(&self, job_id: &str, state: JobState) -> PathBuf {
        self.job_dir(job_id, state).join(format!("{job_id}.toml"))
    }

    pub fn args_file(&self, job_id: &str, state: JobState) -> PathBuf {
        self.job_dir(job_id, state).join(format!("{job_id}.args"))
    }

    /// Readiness marker; exists only in the queue root.
    pub fn ready_file(&self, job_id: &str) -> PathBuf {
        self.queue.join(format!("{job_id}.ready"))
    }

    pub fn pid_file(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id, JobState::Running).join(PID_FILE)
    }

    pub fn log_file(&self, job_id: &str, state: JobState) -> PathBuf {
        self.job_dir(job_id, state).join(LOG_FILE)
    }

    pub fn ret_code_file(&self, job_id: &str, state: JobState) -> PathBuf {
        self.job_dir(job_id, state).join(RET_CODE_FILE)
    }
}
