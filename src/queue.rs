//! Queue and running-set enumeration, plus process identity checks.
//!
//! The scans are pure filesystem reads with no cursor state, so they are
//! restartable and safe to run concurrently with the web layer writing
//! into the queue root.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::config::Config;
use crate::job::{Job, JobResult};
use crate::paths::StateDirs;
use crate::state::JobStatus;

/// Outcome of matching a recorded PID against the configured executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidCheck {
    /// The process exists and is the configured executable.
    Matches,
    /// The process exists but is something else: the PID was reused.
    /// Ambiguous, never kill it.
    Mismatch,
    /// No process with that PID; it has already exited.
    Gone,
}

/// A queue entry as observed by one scan of the queue root.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    pub ready: bool,
}

/// Enumerates jobs on disk and builds [`Job`] handles for them.
#[derive(Debug, Clone)]
pub struct JobsManager {
    dirs: StateDirs,
    exec: PathBuf,
    cache_dir: PathBuf,
}

impl JobsManager {
    pub fn new(config: &Config) -> Self {
        Self {
            dirs: StateDirs::from_config(config),
            exec: config.exec.clone(),
            cache_dir: config.cache_dir.clone(),
        }
    }

    pub fn dirs(&self) -> &StateDirs {
        &self.dirs
    }

    pub fn exec(&self) -> &Path {
        &self.exec
    }

    /// Create the state roots and the cache directory if missing.
    pub fn init_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dirs.queue)?;
        fs::create_dir_all(&self.dirs.running)?;
        fs::create_dir_all(&self.dirs.done)?;
        fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Job {
        Job::new(self.dirs.clone(), job_id)
    }

    /// Probe a job's current status, failing if it has no on-disk evidence
    /// in any state.
    pub fn get_status(&self, job_id: &str) -> JobResult<JobStatus> {
        self.get_job(job_id).status()
    }

    /// Jobs waiting in the queue root, oldest first by file creation time
    /// (modification time where the filesystem records no birth time).
    pub fn jobs_in_queue(&self) -> io::Result<Vec<QueuedJob>> {
        let mut entries: Vec<(SystemTime, String)> = Vec::new();
        for entry in fs::read_dir(&self.dirs.queue)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension() != Some(OsStr::new("toml")) {
                continue;
            }
            if let Some(job_id) = path.file_stem().and_then(|s| s.to_str()) {
                entries.push((created_at(&entry.metadata()?), job_id.to_string()));
            }
        }
        entries.sort();
        Ok(entries
            .into_iter()
            .map(|(_, job_id)| {
                let ready = self.dirs.ready_file(&job_id).exists();
                QueuedJob {
                    job: self.get_job(&job_id),
                    ready,
                }
            })
            .collect())
    }

    /// Jobs with a directory under the running root.
    pub fn running_jobs(&self) -> io::Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.dirs.running)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(job_id) = entry.file_name().to_str() {
                    jobs.push(self.get_job(job_id));
                }
            }
        }
        Ok(jobs)
    }

    /// Match a PID against the configured executable's file name.
    ///
    /// `Gone` means the process no longer exists, which the caller must
    /// treat as "already exited"; `Mismatch` means the PID now belongs to
    /// an unrelated process and must never be signalled.
    pub fn check_pid(&self, pid: i32) -> PidCheck {
        if pid <= 0 {
            return PidCheck::Gone;
        }
        let target = Pid::from_u32(pid as u32);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        match system.process(target) {
            Some(process) => {
                // On Linux the reported name comes from comm, which is
                // capped at 15 bytes; the exe path identifies binaries
                // with longer file names.
                let exec_name = self.exec.file_name().unwrap_or_default();
                let matches = process.name() == exec_name
                    || process.exe().is_some_and(|exe| {
                        exe == self.exec || exe.file_name() == Some(exec_name)
                    });
                if matches {
                    PidCheck::Matches
                } else {
                    PidCheck::Mismatch
                }
            }
            None => PidCheck::Gone,
        }
    }

    /// Kill a job's external process. Only a process positively identified
    /// as the configured executable is signalled; an absent or reused PID
    /// is left alone. Returns whether a signal was delivered.
    pub fn kill_job(&self, job: &Job) -> JobResult<bool> {
        let Some(pid) = job.pid()? else {
            return Ok(false);
        };
        if self.check_pid(pid) == PidCheck::Matches {
            Ok(crate::supervisor::kill(pid))
        } else {
            Ok(false)
        }
    }
}

fn created_at(meta: &fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
