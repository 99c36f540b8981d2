//! Job Lifecycle Tests
//!
//! Exercises the queue/running/done state machine against a real
//! directory tree, through the same API the web layer uses.

use std::fs;
use std::path::Path;

use dose3d_runner::{Config, JobError, JobState, JobsManager};

/// Build a config rooted in a temp directory and create the job tree.
fn make_manager(root: &Path) -> JobsManager {
    let config = Config {
        queue_dir: root.join("queue"),
        running_dir: root.join("running"),
        done_dir: root.join("done"),
        exec: root.join("dose3d"),
        sleep_secs: 1,
        cache_dir: root.join("cache"),
    };
    let jobs = JobsManager::new(&config);
    jobs.init_dirs().unwrap();
    jobs
}

// =============================================================================
// Enqueue and readiness
// =============================================================================

#[test]
fn test_enqueue_then_status_is_queued_not_ready() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());

    jobs.get_job("job_42")
        .flush_to_queue("[sim]\nmode='x'\n", "-f", false)
        .unwrap();

    let status = jobs.get_status("job_42").unwrap();
    assert_eq!(status.state, JobState::Queued);
    assert!(!status.ready);
}

#[test]
fn test_flush_with_ready_is_consumable_immediately() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());

    jobs.get_job("job_42")
        .flush_to_queue("[sim]\n", "", true)
        .unwrap();

    let status = jobs.get_status("job_42").unwrap();
    assert_eq!(status.state, JobState::Queued);
    assert!(status.ready);
}

#[test]
fn test_mark_ready_flips_the_flag() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");

    job.flush_to_queue("[sim]\n", "", false).unwrap();
    assert!(!job.status().unwrap().ready);

    job.mark_ready().unwrap();
    assert!(job.status().unwrap().ready);
}

// =============================================================================
// Dequeue
// =============================================================================

#[test]
fn test_dequeue_not_ready_is_invalid_state() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");
    job.flush_to_queue("[sim]\n", "", false).unwrap();

    assert!(matches!(
        job.dequeue(),
        Err(JobError::InvalidState { .. })
    ));
}

#[test]
fn test_dequeue_removes_ready_marker_only() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");
    job.flush_to_queue("[sim]\n", "", true).unwrap();

    job.dequeue().unwrap();

    // Indistinguishable from a fresh not-ready enqueue.
    assert!(!jobs.dirs().ready_file("job_42").exists());
    assert!(jobs.dirs().toml_file("job_42", JobState::Queued).exists());
    assert!(jobs.dirs().args_file("job_42", JobState::Queued).exists());
    let status = job.status().unwrap();
    assert_eq!(status.state, JobState::Queued);
    assert!(!status.ready);
}

// =============================================================================
// Start, finish, and double dispatch
// =============================================================================

#[test]
fn test_start_is_not_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");
    job.flush_to_queue("[sim]\n", "", true).unwrap();

    job.start().unwrap();
    assert!(matches!(
        job.start(),
        Err(JobError::InvalidState {
            actual: JobState::Running,
            ..
        })
    ));
}

#[test]
fn test_queue_and_running_never_coexist() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");
    job.flush_to_queue("[sim]\n", "", true).unwrap();

    job.start().unwrap();

    assert!(!jobs.dirs().toml_file("job_42", JobState::Queued).exists());
    assert!(!jobs.dirs().args_file("job_42", JobState::Queued).exists());
    assert!(!jobs.dirs().ready_file("job_42").exists());
    assert!(jobs.dirs().job_dir("job_42", JobState::Running).is_dir());
}

#[test]
fn test_finish_leaves_no_trace_under_running_root() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");
    job.flush_to_queue("[sim]\n", "", true).unwrap();
    job.start().unwrap();

    job.finish().unwrap();

    assert_eq!(job.status().unwrap().state, JobState::Done);
    assert_eq!(fs::read_dir(&jobs.dirs().running).unwrap().count(), 0);
    assert!(jobs.dirs().toml_file("job_42", JobState::Done).exists());
}

// =============================================================================
// Queue ordering
// =============================================================================

#[test]
fn test_queue_listing_is_creation_ordered_with_ready_flags() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());

    for (id, ready) in [("a", false), ("b", true), ("c", true)] {
        jobs.get_job(id).flush_to_queue("[sim]\n", "", ready).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    let queue = jobs.jobs_in_queue().unwrap();
    let view: Vec<(String, bool)> = queue
        .iter()
        .map(|q| (q.job.id().to_string(), q.ready))
        .collect();
    assert_eq!(
        view,
        vec![
            ("a".to_string(), false),
            ("b".to_string(), true),
            ("c".to_string(), true),
        ]
    );
}

// =============================================================================
// Purge
// =============================================================================

#[test]
fn test_purge_queued_then_status_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");
    job.flush_to_queue("[sim]\n", "-f", true).unwrap();

    job.purge().unwrap();

    assert_eq!(fs::read_dir(&jobs.dirs().queue).unwrap().count(), 0);
    assert!(matches!(job.status(), Err(JobError::NotFound(_))));
}

#[test]
fn test_purge_done_job_removes_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());
    let job = jobs.get_job("job_42");
    job.flush_to_queue("[sim]\n", "", true).unwrap();
    job.start().unwrap();
    job.finish().unwrap();

    job.purge().unwrap();

    assert!(!jobs.dirs().job_dir("job_42", JobState::Done).exists());
    assert!(matches!(job.status(), Err(JobError::NotFound(_))));
}

// =============================================================================
// Unknown jobs
// =============================================================================

#[test]
fn test_unknown_job_is_not_found_everywhere() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = make_manager(tmp.path());

    assert!(matches!(
        jobs.get_status("ghost"),
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(
        jobs.get_job("ghost").purge(),
        Err(JobError::NotFound(_))
    ));
}
