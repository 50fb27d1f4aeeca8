// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_helpers::{ManualClock, RecordingAlertSink};
use std::sync::Arc;

const START_MS: i64 = 1_700_000_000_000;

fn setup() -> (Database, Arc<ManualClock>, RecordingAlertSink) {
    (
        Database::open_in_memory().unwrap(),
        Arc::new(ManualClock::new(START_MS)),
        RecordingAlertSink::new(),
    )
}

#[test]
fn threshold_triggers_exactly_one_alert_per_cooldown() {
    let (db, clock, sink) = setup();
    let notifier = FailureNotifier::new(&db, clock.clone(), &sink);

    for _ in 0..5 {
        notifier.check(0, 5);
    }
    assert_eq!(sink.sent().len(), 1);
    assert_eq!(notifier.consecutive_failures().unwrap(), 25);
    assert_eq!(
        notifier.last_alert_at().unwrap().map(|t| t.timestamp_millis()),
        Some(START_MS)
    );

    // A success resets the counter
    notifier.check(1, 0);
    assert_eq!(notifier.consecutive_failures().unwrap(), 0);

    // After the cooldown, the next run again needs the full threshold
    clock.advance(Duration::from_secs(3601));
    for _ in 0..4 {
        notifier.check(0, 1);
    }
    assert_eq!(sink.sent().len(), 1);
    notifier.check(0, 1);
    assert_eq!(sink.sent().len(), 2);
}

#[test]
fn below_threshold_does_not_alert() {
    let (db, clock, sink) = setup();
    let notifier = FailureNotifier::new(&db, clock, &sink);

    for _ in 0..4 {
        notifier.check(0, 1);
    }
    assert!(sink.sent().is_empty());
    assert_eq!(notifier.consecutive_failures().unwrap(), 4);
}

#[test]
fn idle_batch_is_noop() {
    let (db, clock, sink) = setup();
    let notifier = FailureNotifier::new(&db, clock, &sink);

    notifier.check(0, 3);
    notifier.check(0, 0);
    assert_eq!(notifier.consecutive_failures().unwrap(), 3);
}

#[test]
fn mixed_batch_resets() {
    let (db, clock, sink) = setup();
    let notifier = FailureNotifier::new(&db, clock, &sink);

    notifier.check(0, 4);
    notifier.check(2, 3);
    assert_eq!(notifier.consecutive_failures().unwrap(), 0);
    assert!(sink.sent().is_empty());
}

#[test]
fn alert_repeats_after_cooldown_while_still_failing() {
    let (db, clock, sink) = setup();
    let notifier = FailureNotifier::new(&db, clock.clone(), &sink);

    notifier.check(0, 5);
    clock.advance(Duration::from_secs(3600));
    notifier.check(0, 1);
    assert_eq!(sink.sent().len(), 1);

    clock.advance(Duration::from_secs(1));
    notifier.check(0, 1);
    assert_eq!(sink.sent().len(), 2);
}

#[test]
fn delivery_failure_is_swallowed_and_starts_cooldown() {
    let (db, clock, _) = setup();
    let sink = RecordingAlertSink::failing();
    let notifier = FailureNotifier::new(&db, clock, &sink);

    notifier.check(0, 5);
    notifier.check(0, 5);
    assert_eq!(sink.sent().len(), 1);
    assert!(notifier.last_alert_at().unwrap().is_some());
}

#[test]
fn custom_threshold_and_cooldown() {
    let (db, clock, sink) = setup();
    let notifier = FailureNotifier::new(&db, clock.clone(), &sink)
        .with_threshold(2)
        .with_cooldown(Duration::from_secs(10));

    notifier.check(0, 1);
    assert!(sink.sent().is_empty());
    notifier.check(0, 1);
    assert_eq!(sink.sent().len(), 1);

    clock.advance(Duration::from_secs(11));
    notifier.check(0, 1);
    assert_eq!(sink.sent().len(), 2);
}

#[test]
fn counter_survives_restart() {
    let (db, clock, sink) = setup();
    FailureNotifier::new(&db, clock.clone(), &sink).check(0, 3);

    let notifier = FailureNotifier::new(&db, clock, &sink);
    notifier.check(0, 2);
    assert_eq!(sink.sent().len(), 1);
}

#[test]
fn log_sink_requires_recipient() {
    let sink = LogAlertSink;
    assert!(matches!(
        sink.send(None, "subject", "body"),
        Err(Error::Alert(_))
    ));
    sink.send(Some("ops@example.com"), "subject", "body")
        .unwrap();
}

#[test]
fn storage_failure_is_swallowed() {
    let (db, clock, sink) = setup();
    db.conn.execute_batch("DROP TABLE sync_state").unwrap();
    let notifier = FailureNotifier::new(&db, clock, &sink);

    notifier.check(0, 10);
    assert!(sink.sent().is_empty());
}
