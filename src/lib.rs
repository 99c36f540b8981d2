//! Dose3D runner - filesystem-backed queue and job lifecycle engine
//!
//! This crate implements the scheduling core for Dose3D radiotherapy dose
//! computations: jobs are queued as flat files on shared disk, executed
//! one at a time as an external process, and tracked through their
//! lifecycle by directory moves alone, so a web layer reading the same
//! tree always observes a single consistent state per job.

pub mod config;
pub mod job;
pub mod paths;
pub mod queue;
pub mod runner;
pub mod state;
pub mod supervisor;

pub use config::{Config, ConfigError};
pub use job::{Job, JobError, JobResult};
pub use paths::StateDirs;
pub use queue::{JobsManager, PidCheck, QueuedJob};
pub use runner::{Runner, RunnerError};
pub use state::{JobState, JobStatus};
pub use supervisor::{LogSink, Supervisor, SupervisorError};
