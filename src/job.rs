//! Job state machine.
//!
//! Every transition is the corresponding filesystem mutation, and the
//! current state is re-derived from disk on each probe. The probe order in
//! [`Job::status`] — done, then running, then queue — lets later lifecycle
//! stages win while a rename is in flight, which is what keeps a job from
//! ever showing up in two states at once.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use walkdir::WalkDir;

use crate::paths::StateDirs;
use crate::state::{JobState, JobStatus};

/// Contents of the readiness marker file.
const READY_MARKER: &str = "go";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {job_id} must be in {expected} state, not in {actual}")]
    InvalidState {
        job_id: String,
        expected: JobState,
        actual: JobState,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// Handle to one job's on-disk representation.
#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    dirs: StateDirs,
}

impl Job {
    pub fn new(dirs: StateDirs, job_id: &str) -> Self {
        Self {
            id: job_id.to_string(),
            dirs,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dirs(&self) -> &StateDirs {
        &self.dirs
    }

    /// Re-derive the job's state from disk.
    ///
    /// Probes the done directory, then the running directory, then the
    /// queue-root payload file. Fails with [`JobError::NotFound`] when no
    /// evidence of the job exists in any state.
    pub fn status(&self) -> JobResult<JobStatus> {
        let state;
        let mut ready = false;
        if self.dirs.job_dir(&self.id, JobState::Done).exists() {
            state = JobState::Done;
        } else if self.dirs.job_dir(&self.id, JobState::Running).exists() {
            state = JobState::Running;
        } else if self.dirs.toml_file(&self.id, JobState::Queued).exists() {
            state = JobState::Queued;
            ready = self.dirs.ready_file(&self.id).exists();
        } else {
            return Err(JobError::NotFound(self.id.clone()));
        }

        let pid = if state == JobState::Running {
            self.pid()?
        } else {
            None
        };
        let exit_code = match state {
            JobState::Running | JobState::Done => {
                read_opt_int(&self.dirs.ret_code_file(&self.id, state))?
            }
            _ => None,
        };

        Ok(JobStatus {
            job_id: self.id.clone(),
            state,
            ready,
            pid,
            exit_code,
        })
    }

    /// Write a new job's payload into the queue root.
    ///
    /// The readiness marker is written last, after payload and args are
    /// fully on disk, so a concurrent queue scan never consumes a
    /// half-written job.
    pub fn flush_to_queue(&self, toml: &str, args: &str, ready: bool) -> JobResult<()> {
        fs::write(self.dirs.toml_file(&self.id, JobState::Queued), toml)?;
        fs::write(self.dirs.args_file(&self.id, JobState::Queued), args)?;
        if ready {
            self.mark_ready()?;
        }
        Ok(())
    }

    /// Flag the job consumable by the runner. Fails unless the job sits
    /// in the queue root, so no stray marker ever appears for a running
    /// or finished job.
    pub fn mark_ready(&self) -> JobResult<()> {
        let status = self.status()?;
        if status.state != JobState::Queued {
            return Err(self.invalid_state(JobState::Queued, &status));
        }
        fs::write(self.dirs.ready_file(&self.id), READY_MARKER)?;
        Ok(())
    }

    /// Withdraw a ready job from the queue, leaving it in the not-ready
    /// stage. Fails unless the job is queued and ready.
    pub fn dequeue(&self) -> JobResult<()> {
        let status = self.status()?;
        if status.state != JobState::Queued || !status.ready {
            return Err(self.invalid_state(JobState::Queued, &status));
        }
        fs::remove_file(self.dirs.ready_file(&self.id))?;
        Ok(())
    }

    /// Move a ready job from the queue root into a dedicated running
    /// directory.
    ///
    /// The directory is created first and the readiness marker removed
    /// last, so an interrupted transition still probes as RUNNING and is
    /// swept up by orphan reconciliation.
    pub fn start(&self) -> JobResult<()> {
        let status = self.status()?;
        if status.state != JobState::Queued || !status.ready {
            return Err(self.invalid_state(JobState::Queued, &status));
        }

        let run_dir = self.dirs.job_dir(&self.id, JobState::Running);
        fs::create_dir_all(&run_dir)?;
        fs::rename(
            self.dirs.toml_file(&self.id, JobState::Queued),
            self.dirs.toml_file(&self.id, JobState::Running),
        )?;
        fs::rename(
            self.dirs.args_file(&self.id, JobState::Queued),
            self.dirs.args_file(&self.id, JobState::Running),
        )?;
        fs::remove_file(self.dirs.ready_file(&self.id))?;
        Ok(())
    }

    /// Move a finished job from the running root to the done root as a
    /// single rename.
    pub fn finish(&self) -> JobResult<()> {
        let status = self.status()?;
        if status.state != JobState::Running {
            return Err(self.invalid_state(JobState::Running, &status));
        }
        fs::rename(
            self.dirs.job_dir(&self.id, JobState::Running),
            self.dirs.job_dir(&self.id, JobState::Done),
        )?;
        Ok(())
    }

    /// Remove every artifact of the job, whatever its state.
    ///
    /// Purging a RUNNING job is a caller-contract violation the core does
    /// not police: callers must confirm no live process first.
    pub fn purge(&self) -> JobResult<()> {
        let status = self.status()?;
        match status.state {
            JobState::Init | JobState::Queued => {
                match fs::remove_file(self.dirs.ready_file(&self.id)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                fs::remove_file(self.dirs.toml_file(&self.id, JobState::Queued))?;
                fs::remove_file(self.dirs.args_file(&self.id, JobState::Queued))?;
            }
            state => {
                fs::remove_dir_all(self.dirs.job_dir(&self.id, state))?;
            }
        }
        Ok(())
    }

    /// PID recorded for the external process, if its marker file exists.
    /// Absence means the process is not running; it is not an error.
    pub fn pid(&self) -> JobResult<Option<i32>> {
        Ok(read_opt_int(&self.dirs.pid_file(&self.id))?)
    }

    /// Exit code recorded for the job, if the process has terminated.
    pub fn exit_code(&self) -> JobResult<Option<i32>> {
        for state in [JobState::Done, JobState::Running] {
            if let Some(code) = read_opt_int(&self.dirs.ret_code_file(&self.id, state))? {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }

    /// Command-line arguments for the executable, read from the first line
    /// of the args file in the job's current state directory.
    pub fn load_args(&self) -> JobResult<Vec<String>> {
        let status = self.status()?;
        let text = fs::read_to_string(self.dirs.args_file(&self.id, status.state))?;
        Ok(text
            .lines()
            .next()
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// The captured process output as one string.
    pub fn load_log(&self) -> JobResult<String> {
        let status = self.status()?;
        Ok(fs::read_to_string(
            self.dirs.log_file(&self.id, status.state),
        )?)
    }

    /// ROOT result files produced by the simulation, oldest first,
    /// including files in subdirectories.
    pub fn output_files(&self) -> JobResult<Vec<PathBuf>> {
        let status = self.status()?;
        let dir = self.dirs.job_dir(&self.id, status.state);
        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "root")
            {
                let meta = entry.metadata().map_err(io::Error::from)?;
                files.push((created_at(&meta), entry.into_path()));
            }
        }
        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Per-run simulation log files under the job's `log/` subdirectory,
    /// oldest first. Missing subdirectory means no logs yet.
    pub fn sim_log_files(&self) -> JobResult<Vec<PathBuf>> {
        let status = self.status()?;
        let dir = self.dirs.job_dir(&self.id, status.state).join("log");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_file() && path.extension().is_some_and(|ext| ext == "log") {
                files.push((created_at(&entry.metadata()?), path));
            }
        }
        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    fn invalid_state(&self, expected: JobState, status: &JobStatus) -> JobError {
        // A queued job without its readiness marker reports as INIT here,
        // matching what the web layer shows the user.
        let actual = if status.state == JobState::Queued && !status.ready {
            JobState::Init
        } else {
            status.state
        };
        JobError::InvalidState {
            job_id: self.id.clone(),
            expected,
            actual,
        }
    }
}

/// Read an optional integer marker file. A missing file is `None`; a file
/// that exists but holds no integer is corrupt and reported as an error.
fn read_opt_int(path: &Path) -> io::Result<Option<i32>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let value = text.trim().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} does not contain an integer", path.display()),
        )
    })?;
    Ok(Some(value))
}

fn created_at(meta: &fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
