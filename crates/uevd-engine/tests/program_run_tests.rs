mod common;

use std::time::{Duration, Instant};

use common::{Harness, DISK_DEVPATH};
use uevd_core_types::{DeviceAction, Devnum};
use uevd_engine::{EventDisposition, FailureReason, ProgramFailure};

// ===== DEFERRED PROGRAM TESTS =====

#[tokio::test]
async fn test_deferred_program_runs_after_node_actions() {
    let harness = Harness::new("KERNEL==\"sda\", RUN+=\"touch $env{MARKER}\"\n");
    let marker = harness.dev.path().join("ran.marker");
    let engine = harness.engine();

    // Carry the marker path into the event's properties
    let record = uevd_core::model::UeventRecord::new(DeviceAction::Add, DISK_DEVPATH)
        .with_property("MAJOR", "8")
        .with_property("MINOR", "0")
        .with_property("MARKER", marker.to_string_lossy().into_owned());
    let snap = uevd_core::SnapshotBuilder::new(harness.sysfs.path())
        .build(&record)
        .unwrap();

    let result = engine.process(snap).await;

    assert_eq!(result.disposition, EventDisposition::Success);
    assert!(marker.exists());
    assert_eq!(result.program_outcomes.len(), 1);
    assert!(result.program_outcomes[0].success());
}

#[tokio::test]
async fn test_program_environment_carries_properties() {
    let harness = Harness::new(
        "KERNEL==\"sda\", RUN+=\"sh -c 'printf %s \\\"$SUBSYSTEM\\\" > \\\"$OUTFILE\\\"'\"\n",
    );
    let outfile = harness.dev.path().join("subsystem.txt");
    let engine = harness.engine();

    let record = uevd_core::model::UeventRecord::new(DeviceAction::Add, DISK_DEVPATH)
        .with_property("MAJOR", "8")
        .with_property("MINOR", "0")
        .with_property("OUTFILE", outfile.to_string_lossy().into_owned());
    let snap = uevd_core::SnapshotBuilder::new(harness.sysfs.path())
        .build(&record)
        .unwrap();

    engine.process(snap).await;

    assert_eq!(std::fs::read_to_string(&outfile).unwrap(), "block");
}

#[tokio::test]
async fn test_nonfatal_program_failure_does_not_abort_queue() {
    let harness = Harness::new(concat!(
        "KERNEL==\"sda\", RUN+=\"false\"\n",
        "KERNEL==\"sda\", RUN+=\"touch $env{MARKER}\"\n",
    ));
    let marker = harness.dev.path().join("after-failure.marker");
    let engine = harness.engine();

    let record = uevd_core::model::UeventRecord::new(DeviceAction::Add, DISK_DEVPATH)
        .with_property("MAJOR", "8")
        .with_property("MINOR", "0")
        .with_property("MARKER", marker.to_string_lossy().into_owned());
    let snap = uevd_core::SnapshotBuilder::new(harness.sysfs.path())
        .build(&record)
        .unwrap();

    let result = engine.process(snap).await;

    // The failing program degrades the event but the later one still ran
    assert_eq!(result.disposition, EventDisposition::DegradedSuccess);
    assert!(marker.exists());
}

#[tokio::test]
async fn test_mandatory_program_failure_fails_event() {
    let harness = Harness::new(concat!(
        "KERNEL==\"sda\", RUN{mandatory}+=\"false\"\n",
        "KERNEL==\"sda\", RUN+=\"touch $env{MARKER}\"\n",
    ));
    let marker = harness.dev.path().join("should-not-exist.marker");
    let engine = harness.engine();

    let record = uevd_core::model::UeventRecord::new(DeviceAction::Add, DISK_DEVPATH)
        .with_property("MAJOR", "8")
        .with_property("MINOR", "0")
        .with_property("MARKER", marker.to_string_lossy().into_owned());
    let snap = uevd_core::SnapshotBuilder::new(harness.sysfs.path())
        .build(&record)
        .unwrap();

    let result = engine.process(snap).await;

    assert_eq!(
        result.disposition,
        EventDisposition::Failed(FailureReason::MandatoryProgram)
    );
    // Remaining queue entries do not run after a mandatory failure
    assert!(!marker.exists());
}

// ===== TIMEOUT TESTS =====

#[tokio::test]
async fn test_program_timeout_kills_and_records_failure() {
    let harness = Harness::new("KERNEL==\"sda\", RUN+=\"sleep 5\"\n");
    let engine = harness.engine_with_timeout(Duration::from_millis(300));
    let snap = harness.snapshot(DeviceAction::Add, DISK_DEVPATH, Some(Devnum::new(8, 0)));

    let started = Instant::now();
    let result = engine.process(snap).await;
    let elapsed = started.elapsed();

    // Terminated within the timeout window plus scheduling tolerance,
    // nowhere near the program's own 5s
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(result.disposition, EventDisposition::DegradedSuccess);
    assert!(result.program_outcomes.iter().any(|o| o.timed_out));
    assert!(result
        .errors
        .iter()
        .any(|e| matches!(e, uevd_engine::EngineError::Program { reason: ProgramFailure::Timeout, .. })));
}

// ===== PROGRAM PREDICATE / IMPORT TESTS =====

#[tokio::test]
async fn test_program_predicate_and_result_matching() {
    let harness = Harness::new(concat!(
        "KERNEL==\"sda\", PROGRAM==\"echo matched-output\", RESULT==\"matched-*\", SYMLINK+=\"from-result\"\n",
        "KERNEL==\"sda\", PROGRAM==\"false\", SYMLINK+=\"never\"\n",
    ));
    let engine = harness.engine();
    let snap = harness.snapshot(DeviceAction::Add, DISK_DEVPATH, Some(Devnum::new(8, 0)));

    engine.process(snap).await;

    assert!(std::fs::read_link(harness.dev_path("from-result")).is_ok());
    assert!(std::fs::read_link(harness.dev_path("never")).is_err());
}

#[tokio::test]
async fn test_import_program_properties_visible_to_later_rules() {
    let harness = Harness::new(concat!(
        "KERNEL==\"sda\", IMPORT{program}=\"echo ID_PROBED=42\"\n",
        "ENV{ID_PROBED}==\"42\", SYMLINK+=\"imported\"\n",
    ));
    let engine = harness.engine();
    let snap = harness.snapshot(DeviceAction::Add, DISK_DEVPATH, Some(Devnum::new(8, 0)));

    engine.process(snap).await;

    assert!(std::fs::read_link(harness.dev_path("imported")).is_ok());
}

#[tokio::test]
async fn test_import_file_properties() {
    let harness = Harness::new("");
    let env_file = harness.dev.path().join("disk.env");
    std::fs::write(&env_file, "# generated\nID_SITE=\"rack 4\"\n").unwrap();
    // The rule file references the temp path, so write it after the fact
    std::fs::write(
        harness.rules.path().join("50-test.rules"),
        format!(
            "KERNEL==\"sda\", IMPORT{{file}}=\"{}\"\nENV{{ID_SITE}}==\"rack 4\", SYMLINK+=\"sited\"\n",
            env_file.display()
        ),
    )
    .unwrap();
    let engine = harness.engine();
    let snap = harness.snapshot(DeviceAction::Add, DISK_DEVPATH, Some(Devnum::new(8, 0)));

    engine.process(snap).await;

    assert!(std::fs::read_link(harness.dev_path("sited")).is_ok());
}
