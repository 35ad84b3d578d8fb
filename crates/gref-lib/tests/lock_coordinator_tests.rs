//! Acquisition, reclaim, and ownership tests for the lock coordinator.

use chrono::{Duration, Utc};
use gref_lib::lock::{read_lock_record, AcquireOutcome, LockCoordinator, LockError, LockPatch};
use gref_types::{EvalRunSummary, LockFileStatus, RunOptions, RunPhase};
use tempfile::TempDir;

/// A pid far above any default Linux pid ceiling, guaranteed dead.
const DEAD_PID: u32 = 999_999_999;

fn options_in(dir: &TempDir) -> RunOptions {
    RunOptions::new(
        "claude-3-5-sonnet-latest",
        "anthropic",
        dir.path().join("guidelines.md"),
        dir.path().join("state"),
    )
}

fn write_record(options: &RunOptions, record: &LockFileStatus) {
    let path = options.lock_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(record).unwrap()).unwrap();
}

#[test]
fn acquire_creates_a_fresh_record_in_startup() {
    let dir = TempDir::new().unwrap();
    let options = options_in(&dir);
    let coordinator = LockCoordinator::new(&options);

    let outcome = coordinator.acquire(&options).unwrap();
    let AcquireOutcome::Acquired(record) = outcome else {
        panic!("expected a fresh acquisition");
    };
    assert_eq!(record.run_id, options.run_id);
    assert_eq!(record.pid, std::process::id());
    assert_eq!(record.phase, RunPhase::Startup);

    let on_disk = read_lock_record(&options.lock_path()).unwrap().unwrap();
    assert_eq!(on_disk, record);
}

#[test]
fn acquire_fails_busy_while_the_holder_lives() {
    let dir = TempDir::new().unwrap();
    let first = options_in(&dir);
    LockCoordinator::new(&first).acquire(&first).unwrap();

    // Same key, different invocation. The first holder is this very process,
    // alive and freshly updated.
    let mut second = first.clone();
    second.run_id = "contender".to_string();
    let err = LockCoordinator::new(&second).acquire(&second).unwrap_err();
    match err {
        LockError::Busy { pid, .. } => assert_eq!(pid, std::process::id()),
        other => panic!("expected Busy, got: {other}"),
    }
}

#[test]
fn acquire_reclaims_a_dead_holder() {
    let dir = TempDir::new().unwrap();
    let options = options_in(&dir);

    let mut abandoned = LockFileStatus::new(&options, DEAD_PID);
    abandoned.run_id = "crashed-run".to_string();
    abandoned.phase = RunPhase::Refinement;
    abandoned.stable_iterations = 2;
    write_record(&options, &abandoned);

    let mut fresh = options.clone();
    fresh.run_id = "resumer".to_string();
    let outcome = LockCoordinator::new(&fresh).acquire(&fresh).unwrap();
    let AcquireOutcome::Reclaimed { record, previous } = outcome else {
        panic!("expected a reclaim");
    };
    assert_eq!(record.reclaimed_from.as_deref(), Some("crashed-run"));
    assert_eq!(record.phase, RunPhase::Startup);
    assert_eq!(previous.stable_iterations, 2);
}

#[test]
fn acquire_reclaims_a_live_but_silent_holder() {
    let dir = TempDir::new().unwrap();
    let mut options = options_in(&dir);
    options.liveness_window_secs = 60;

    // Holder pid is alive (it is us) but the record went silent long past
    // the liveness window.
    let mut stale = LockFileStatus::new(&options, std::process::id());
    stale.run_id = "silent-run".to_string();
    stale.updated_at = Utc::now() - Duration::seconds(3600);
    write_record(&options, &stale);

    let mut fresh = options.clone();
    fresh.run_id = "resumer".to_string();
    let outcome = LockCoordinator::new(&fresh).acquire(&fresh).unwrap();
    assert!(matches!(outcome, AcquireOutcome::Reclaimed { .. }));
}

#[test]
fn acquire_over_a_completed_run_is_not_a_reclaim() {
    let dir = TempDir::new().unwrap();
    let options = options_in(&dir);
    let coordinator = LockCoordinator::new(&options);
    coordinator.acquire(&options).unwrap();
    coordinator.release().unwrap();

    let mut next = options.clone();
    next.run_id = "next-run".to_string();
    let outcome = LockCoordinator::new(&next).acquire(&next).unwrap();
    let AcquireOutcome::Acquired(record) = outcome else {
        panic!("a completed record should not count as a reclaim");
    };
    assert!(record.reclaimed_from.is_none());
}

#[test]
fn update_merges_fields_and_rewrites_updated_at() {
    let dir = TempDir::new().unwrap();
    let options = options_in(&dir);
    let coordinator = LockCoordinator::new(&options);
    let before = coordinator.acquire(&options).unwrap().record().clone();

    let summary = EvalRunSummary {
        passed: 8,
        failed: 2,
        total: 10,
    };
    let updated = coordinator
        .update(
            LockPatch::action("iteration complete")
                .with_phase(RunPhase::Refinement)
                .with_iteration(3)
                .with_last_eval_result(summary)
                .with_plateau(8, 3, 0),
        )
        .unwrap();

    assert_eq!(updated.phase, RunPhase::Refinement);
    assert_eq!(updated.iteration, 3);
    assert_eq!(updated.last_eval_result, Some(summary));
    assert_eq!(updated.best_pass_count, 8);
    assert_eq!(updated.current_action, "iteration complete");
    assert!(updated.updated_at >= before.updated_at);
    // Untouched fields carry over.
    assert_eq!(updated.run_id, before.run_id);
    assert_eq!(updated.started_at, before.started_at);
}

#[test]
fn update_rejects_phase_regression() {
    let dir = TempDir::new().unwrap();
    let options = options_in(&dir);
    let coordinator = LockCoordinator::new(&options);
    coordinator.acquire(&options).unwrap();
    coordinator
        .update(LockPatch::default().with_phase(RunPhase::Refinement))
        .unwrap();

    let err = coordinator
        .update(LockPatch::default().with_phase(RunPhase::Startup))
        .unwrap_err();
    assert!(matches!(err, LockError::PhaseRegression { .. }));
}

#[test]
fn update_detects_lost_ownership() {
    let dir = TempDir::new().unwrap();
    let options = options_in(&dir);
    let coordinator = LockCoordinator::new(&options);
    coordinator.acquire(&options).unwrap();

    // Another process reclaimed the key behind our back.
    let mut foreign = options.clone();
    foreign.run_id = "usurper".to_string();
    write_record(&options, &LockFileStatus::new(&foreign, DEAD_PID));

    let err = coordinator
        .update(LockPatch::action("still going"))
        .unwrap_err();
    match err {
        LockError::LostOwnership { holder_run_id, .. } => {
            assert_eq!(holder_run_id, "usurper");
        }
        other => panic!("expected LostOwnership, got: {other}"),
    }
}

#[test]
fn release_completes_and_leaves_the_record() {
    let dir = TempDir::new().unwrap();
    let options = options_in(&dir);
    let coordinator = LockCoordinator::new(&options);
    coordinator.acquire(&options).unwrap();

    let released = coordinator.release().unwrap();
    assert_eq!(released.phase, RunPhase::Complete);
    assert!(options.lock_path().exists());
}
