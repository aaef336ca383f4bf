mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Harness, DISK_DEVPATH, TTY0_DEVPATH, TTY1_DEVPATH};
use uevd_core_types::{DeviceAction, Devnum};
use uevd_engine::{EventDispatcher, EventDisposition, SerialGate};

fn dispatcher(harness: &Harness) -> EventDispatcher {
    EventDispatcher::new(Arc::new(harness.engine()), SerialGate::new())
}

// ===== END-TO-END ORDERING TESTS =====

#[tokio::test]
async fn test_add_then_remove_in_submission_order() {
    let harness = Harness::new("KERNEL==\"sda\", SYMLINK+=\"disk1\"\n");
    let dispatcher = dispatcher(&harness);

    let add = harness.snapshot(DeviceAction::Add, DISK_DEVPATH, Some(Devnum::new(8, 0)));
    let remove = harness.snapshot(DeviceAction::Remove, DISK_DEVPATH, Some(Devnum::new(8, 0)));

    // Submitted back to back; the gate guarantees add completes first
    let h1 = dispatcher.submit(add);
    let h2 = dispatcher.submit(remove);
    let r1 = h1.await.unwrap();
    let r2 = h2.await.unwrap();

    assert_eq!(r1.disposition, EventDisposition::Success);
    assert_eq!(r2.disposition, EventDisposition::Success);
    // Terminal state: the remove ran after the add, so nothing is left
    assert!(!harness.dev_path("sda").exists());
    assert!(std::fs::read_link(harness.dev_path("disk1")).is_err());
}

#[tokio::test]
async fn test_unrelated_devices_process_concurrently_end_to_end() {
    // Each event runs a 200ms program; concurrent processing finishes in
    // roughly max, serialized would take the sum.
    let harness = Harness::new("SUBSYSTEM==\"tty\", RUN+=\"sleep 0.2\"\n");
    let dispatcher = dispatcher(&harness);

    let a = harness.snapshot(DeviceAction::Add, TTY0_DEVPATH, Some(Devnum::new(4, 64)));
    let b = harness.snapshot(DeviceAction::Add, TTY1_DEVPATH, Some(Devnum::new(4, 65)));

    let started = Instant::now();
    let h1 = dispatcher.submit(a);
    let h2 = dispatcher.submit(b);
    h1.await.unwrap();
    h2.await.unwrap();
    let total = started.elapsed();

    assert!(
        total < Duration::from_millis(380),
        "events serialized: {:?}",
        total
    );
}

#[tokio::test]
async fn test_serial_action_token_binds_for_later_events() {
    // The first event executes SERIAL="shared"; afterwards the binding is
    // visible on the dispatcher's gate.
    let harness = Harness::new("SUBSYSTEM==\"tty\", SERIAL=\"shared\"\n");
    let dispatcher = dispatcher(&harness);

    let snap = harness.snapshot(DeviceAction::Add, TTY0_DEVPATH, Some(Devnum::new(4, 64)));
    let result = dispatcher.submit(snap).await.unwrap();

    assert_eq!(result.wait_token.as_deref(), Some("shared"));

    // Bind the same token for the second device the way a matching event
    // would, then verify the two devices serialize.
    dispatcher.gate().bind_token(TTY1_DEVPATH, "shared");

    let slow_rules = "SUBSYSTEM==\"tty\", RUN+=\"sleep 0.2\"\n";
    std::fs::write(harness.rules.path().join("50-test.rules"), slow_rules).unwrap();
    let slow_engine = Arc::new(harness.engine());
    let slow_dispatcher = EventDispatcher::new(slow_engine, dispatcher.gate().clone());

    let a = harness.snapshot(DeviceAction::Add, TTY0_DEVPATH, Some(Devnum::new(4, 64)));
    let b = harness.snapshot(DeviceAction::Add, TTY1_DEVPATH, Some(Devnum::new(4, 65)));

    let started = Instant::now();
    let h1 = slow_dispatcher.submit(a);
    let h2 = slow_dispatcher.submit(b);
    h1.await.unwrap();
    h2.await.unwrap();
    let total = started.elapsed();

    assert!(
        total >= Duration::from_millis(380),
        "token-bound devices overlapped: {:?}",
        total
    );
}

#[tokio::test]
async fn test_event_result_reports_identity() {
    let harness = Harness::new("KERNEL==\"sda\", SYMLINK+=\"disk1\"\n");
    let dispatcher = dispatcher(&harness);
    let snap = harness.snapshot(DeviceAction::Add, DISK_DEVPATH, Some(Devnum::new(8, 0)));

    let result = dispatcher.submit(snap).await.unwrap();

    assert_eq!(result.identity.devpath, DISK_DEVPATH);
    assert_eq!(result.identity.subsystem.as_deref(), Some("block"));
    assert!(result.errors.is_empty());
}
