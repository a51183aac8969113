//! End-to-end supervisor tests against real subprocesses (`/bin/sh`).
#![cfg(unix)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use droid_lane::error::{LaneError, TimeoutKind};
use droid_lane::progress;
use droid_lane::supervisor::SupervisedCommand;
use droid_lane::timeout::TimeoutPolicy;

fn sh(script: &str, dir: &std::path::Path, policy: TimeoutPolicy) -> SupervisedCommand {
    SupervisedCommand::new("/bin/sh", dir, policy)
        .arg("-c")
        .arg(script)
        .timeout_check_every(Duration::from_millis(100))
}

#[test]
fn successful_run_returns_stdout() {
    let dir = TempDir::new().unwrap();
    let out = sh(
        "echo preparing; echo BUILD SUCCESSFUL",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(30)),
    )
    .run(dir.path(), None)
    .unwrap();

    assert!(out.contains("preparing"));
    assert!(out.contains("BUILD SUCCESSFUL"));
}

#[test]
fn progress_lines_are_streamed() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = progress::channel();

    sh(
        "echo step one; echo step two",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(30)),
    )
    .run(dir.path(), Some(&tx))
    .unwrap();
    drop(tx);

    let lines: Vec<String> = rx.iter().collect();
    assert!(!lines.is_empty());
    assert!(lines.iter().all(|l| l.chars().count() <= 150));
}

#[test]
fn failure_message_contains_extracted_error_and_log_pointer() {
    let dir = TempDir::new().unwrap();
    let err = sh(
        "echo compiling; echo 'error: cannot find symbol Foo'; exit 1",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(30)),
    )
    .run(dir.path(), None)
    .unwrap_err();

    match err {
        LaneError::BuildTool {
            tool,
            exit_code,
            message,
        } => {
            assert_eq!(tool, "/bin/sh");
            assert_eq!(exit_code, Some(1));
            assert!(message.contains("error: cannot find symbol Foo"));
            assert!(message.contains("full log:"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn failure_without_error_tokens_falls_back_to_tail() {
    let dir = TempDir::new().unwrap();
    let err = sh(
        "echo just some output; echo final line; exit 3",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(30)),
    )
    .run(dir.path(), None)
    .unwrap_err();

    match err {
        LaneError::BuildTool { message, .. } => {
            assert!(message.contains("final line"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn failure_writes_log_and_error_dump() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");
    let err = sh(
        "echo 'error: broken'; exit 1",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(30)),
    )
    .run(&log_dir, None)
    .unwrap_err();
    assert!(matches!(err, LaneError::BuildTool { .. }));

    let names: Vec<String> = std::fs::read_dir(&log_dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.ends_with(".log")));
    assert!(names.iter().any(|n| n.ends_with(".error")));
}

#[test]
fn missing_program_is_spawn_error() {
    let dir = TempDir::new().unwrap();
    let err = SupervisedCommand::new(
        "/nonexistent/droid-lane-tool",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(5)),
    )
    .run(dir.path(), None)
    .unwrap_err();

    match err {
        LaneError::Spawn { program, .. } => {
            assert_eq!(program, "/nonexistent/droid-lane-tool");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn inactivity_window_kills_silent_process() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");
    let started = Instant::now();
    let err = sh(
        "echo starting; sleep 30; echo done",
        dir.path(),
        TimeoutPolicy::InactivityWindow(Duration::from_millis(300)),
    )
    .run(&log_dir, None)
    .unwrap_err();

    match err {
        LaneError::Timeout { kind, .. } => assert_eq!(kind, TimeoutKind::Inactivity),
        other => panic!("unexpected error: {other:?}"),
    }
    // The 30s sleep must not have run to completion.
    assert!(started.elapsed() < Duration::from_secs(10));

    // Abnormal exits still persist the dump with the output seen so far.
    let names: Vec<String> = std::fs::read_dir(&log_dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.ends_with(".error")));
}

#[test]
fn absolute_budget_fires_despite_steady_output() {
    let dir = TempDir::new().unwrap();
    let started = Instant::now();
    let err = sh(
        "while true; do echo tick; sleep 0.05; done",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_millis(300)),
    )
    .run(dir.path(), None)
    .unwrap_err();

    match err {
        LaneError::Timeout { kind, .. } => assert_eq!(kind, TimeoutKind::Absolute),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn preset_cancel_flag_stops_build_quickly() {
    let dir = TempDir::new().unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::SeqCst);

    let started = Instant::now();
    let err = sh(
        "sleep 30",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(60)),
    )
    .with_cancel_flag(cancel)
    .run(dir.path(), None)
    .unwrap_err();

    assert!(matches!(err, LaneError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn env_overrides_are_merged_over_inherited() {
    let dir = TempDir::new().unwrap();
    // PATH comes from the inherited environment; the override adds a key.
    let out = sh(
        "echo marker=$DROID_LANE_TEST_MARKER path_set=${PATH:+yes}",
        dir.path(),
        TimeoutPolicy::AbsoluteFromStart(Duration::from_secs(30)),
    )
    .env("DROID_LANE_TEST_MARKER", "42")
    .run(dir.path(), None)
    .unwrap();

    assert!(out.contains("marker=42"));
    assert!(out.contains("path_set=yes"));
}
