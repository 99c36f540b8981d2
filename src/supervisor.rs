//! External process supervision.
//!
//! Spawns the Dose3D executable for one job, streams its combined output
//! line by line into `log.txt`, and keeps the `pid` and `ret_code.txt`
//! marker files truthful around the process lifetime: the pid marker is
//! written before the first output line is consumed and removed before the
//! exit code is recorded.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, SyncSender};
use std::thread;

use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;

use crate::job::{Job, JobError};
use crate::state::JobState;

/// Capacity of the channel between the pipe readers and the log writer.
/// Bounds log-persistence lag without ever reordering lines.
const LINE_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch {exec}: {source}")]
    Launch {
        exec: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("job {0} must be in RUNNING state to execute")]
    NotRunning(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Receives each output line as the supervisor persists it. Used by the
/// runner binary for console echo; anything implementing `FnMut(&str)`
/// qualifies.
pub trait LogSink {
    fn line(&mut self, line: &str);
}

impl<F: FnMut(&str)> LogSink for F {
    fn line(&mut self, line: &str) {
        self(line)
    }
}

/// Runs the external executable for one job at a time.
#[derive(Debug, Clone)]
pub struct Supervisor {
    exec: PathBuf,
}

impl Supervisor {
    pub fn new(exec: PathBuf) -> Self {
        Self { exec }
    }

    pub fn exec(&self) -> &PathBuf {
        &self.exec
    }

    /// Execute the job synchronously and return its exit code.
    ///
    /// Invocation: `{exec} -t {running}/{id}/{id}.toml -o {running}/{id}
    /// {args...}`. stdout and stderr are merged; each line is appended to
    /// `log.txt` verbatim (bytes, trailing newline included) before the
    /// next line is taken off the channel, and echoed to `sink`. A log
    /// write failure does not abandon the child: the process is drained
    /// and awaited, the marker files are finalized, and the error is
    /// surfaced afterwards.
    pub fn run(&self, job: &Job, sink: &mut dyn LogSink) -> Result<i32, SupervisorError> {
        let status = job.status()?;
        if status.state != JobState::Running {
            return Err(SupervisorError::NotRunning(job.id().to_string()));
        }

        let args = job.load_args()?;
        let dirs = job.dirs();
        let input_toml = dirs.toml_file(job.id(), JobState::Running);
        let out_dir = dirs.job_dir(job.id(), JobState::Running);

        let shown: Vec<String> = [
            self.exec.display().to_string(),
            "-t".to_string(),
            input_toml.display().to_string(),
            "-o".to_string(),
            out_dir.display().to_string(),
        ]
        .into_iter()
        .chain(args.iter().cloned())
        .collect();
        sink.line(&format!("Execute: {}", shown.join(" ")));

        let mut child = Command::new(&self.exec)
            .arg("-t")
            .arg(&input_toml)
            .arg("-o")
            .arg(&out_dir)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Launch {
                exec: self.exec.clone(),
                source,
            })?;

        // The marker must exist before any output is consumed so a
        // concurrent crash-recovery scan can always find the process.
        let pid_file = dirs.pid_file(job.id());
        if let Err(e) = fs::write(&pid_file, child.id().to_string()) {
            // Without the marker no recovery scan can find the process,
            // so it must not be left behind.
            let _ = child.kill();
            let _ = child.wait();
            return Err(SupervisorError::Io(e));
        }
        sink.line(&format!("PID of process: {}", child.id()));

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(LINE_BUFFER);
        let stdout_handle = spawn_reader(child.stdout.take(), tx.clone());
        let stderr_handle = spawn_reader(child.stderr.take(), tx);

        let log_path = dirs.log_file(job.id(), JobState::Running);
        let mut log_err: Option<io::Error> = None;
        let mut log = match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => Some(file),
            Err(e) => {
                log_err = Some(e);
                None
            }
        };

        // The channel closes once both pipes hit EOF, which only happens
        // when the process is gone; the wait below then reaps immediately.
        for chunk in rx {
            if let Some(file) = log.as_mut() {
                if let Err(e) = file.write_all(&chunk) {
                    log_err = Some(e);
                    log = None;
                }
            }
            let text = String::from_utf8_lossy(&chunk);
            sink.line(&format!("> {}", text.trim_end_matches(['\r', '\n'])));
        }
        let _ = stdout_handle.join();
        let _ = stderr_handle.join();

        let exit = child.wait()?;
        let code = exit_code_of(&exit);

        fs::remove_file(&pid_file)?;
        fs::write(
            dirs.ret_code_file(job.id(), JobState::Running),
            code.to_string(),
        )?;
        sink.line(&format!("End with code: {code}"));

        match log_err {
            Some(e) => Err(SupervisorError::Io(e)),
            None => Ok(code),
        }
    }
}

/// Send a kill signal to a process. A missing process is not an error;
/// returns whether a signal was delivered.
pub fn kill(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let target = Pid::from_u32(pid as u32);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    match system.process(target) {
        Some(process) => process.kill(),
        None => false,
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
    tx: SyncSender<Vec<u8>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let Some(source) = source else { return };
        let mut reader = BufReader::new(source);
        loop {
            let mut chunk = Vec::new();
            match reader.read_until(b'\n', &mut chunk) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    // Signal deaths are recorded as the negated signal number, the same
    // convention the web layer already understands.
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
