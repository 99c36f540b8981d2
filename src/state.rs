//! Job lifecycle states.
//!
//! A job's state is never stored in an explicit field on disk; it is
//! inferred from which directory or file exists for its id. `Init` is the
//! stage of a queued job whose readiness marker has not been written yet —
//! it shares the queue root with `Queued` and is reported by the status
//! probe as `Queued` with `ready = false`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job: QUEUED → RUNNING → DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Payload written into the queue root, readiness marker not yet set.
    Init,
    /// Waiting in the queue root, consumable by the runner.
    Queued,
    /// Under execution in a dedicated running directory.
    Running,
    /// Execution finished, artifacts moved to the done root.
    Done,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Init => "INIT",
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
        };
        write!(f, "{name}")
    }
}

/// Point-in-time snapshot of a job as observed on disk.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    /// Job identifier.
    pub job_id: String,
    /// Current state.
    pub state: JobState,
    /// Meaningful only while the job sits in the queue root.
    pub ready: bool,
    /// PID of the external process, present only while it is alive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Exit code of the external process, present once it has terminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
