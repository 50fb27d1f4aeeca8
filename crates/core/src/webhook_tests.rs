// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::cache::{DbCache, MemoryCache};
use crate::db::Database;
use crate::job::{Direction, JobStatus};
use crate::test_helpers::{InMemoryRemote, ManualClock, RecordingModule};
use std::sync::Arc;
use yare::parameterized;

const START_MS: i64 = 1_700_000_000_000;
const BODY: &[u8] = br#"{"module":"crm","entity_type":"contact","remote_id":42,"action":"update","name":"Acme"}"#;

fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register(Box::new(RecordingModule::new(
            "crm",
            Arc::new(InMemoryRemote::new()),
        )))
        .unwrap();
    registry
}

#[parameterized(
    atomic = { true },
    fallback = { false },
)]
fn identical_bodies_enqueue_one_job(atomic: bool) {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = if atomic {
        MemoryCache::new(clock)
    } else {
        MemoryCache::without_atomic(clock)
    };
    let gate = WebhookGate::new(&queue, &registry, &cache);

    let first = gate.handle("10.0.0.1", BODY).unwrap();
    let second = gate.handle("10.0.0.1", BODY).unwrap();

    assert!(matches!(first, WebhookOutcome::Enqueued { .. }));
    assert_eq!(second, WebhookOutcome::Duplicate);
    assert_eq!(queue.stats().unwrap().pending, 1);
}

#[test]
fn enqueued_job_is_a_pull_with_full_payload() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = MemoryCache::new(clock);
    let gate = WebhookGate::new(&queue, &registry, &cache);

    let WebhookOutcome::Enqueued { job_id } = gate.handle("caller", BODY).unwrap() else {
        unreachable!("first delivery is never a duplicate");
    };
    let job = queue.get(job_id).unwrap();
    assert_eq!(job.direction, Direction::Pull);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.remote_id, Some(42));
    assert_eq!(job.action, Action::Update);
    assert_eq!(
        job.payload.unwrap().get("name"),
        Some(&serde_json::json!("Acme"))
    );
}

#[test]
fn window_expiry_allows_redelivery() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = MemoryCache::new(clock.clone());
    let gate = WebhookGate::new(&queue, &registry, &cache);

    gate.handle("caller", BODY).unwrap();
    clock.advance(Duration::from_secs(299));
    assert_eq!(gate.handle("caller", BODY).unwrap(), WebhookOutcome::Duplicate);

    clock.advance(Duration::from_secs(1));
    assert!(matches!(
        gate.handle("caller", BODY).unwrap(),
        WebhookOutcome::Enqueued { .. }
    ));
}

#[test]
fn different_bodies_are_not_duplicates() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = DbCache::new(&db, clock);
    let gate = WebhookGate::new(&queue, &registry, &cache);

    gate.handle("caller", br#"{"module":"crm","entity_type":"contact","remote_id":1}"#)
        .unwrap();
    gate.handle("caller", br#"{"module":"crm","entity_type":"contact","remote_id":2}"#)
        .unwrap();
    assert_eq!(queue.stats().unwrap().pending, 2);
}

#[test]
fn action_defaults_to_update() {
    let notification =
        WebhookNotification::parse(br#"{"module":"crm","entity_type":"contact","remote_id":5}"#)
            .unwrap();
    assert_eq!(notification.action, Action::Update);
}

#[parameterized(
    not_json = { b"not json" },
    missing_remote_id = { br#"{"module":"crm","entity_type":"contact"}"# },
    bad_action = { br#"{"module":"crm","entity_type":"contact","remote_id":1,"action":"merge"}"# },
)]
fn malformed_bodies_are_rejected(body: &[u8]) {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = MemoryCache::new(clock);
    let gate = WebhookGate::new(&queue, &registry, &cache);

    let err = gate.handle("caller", body).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(cache.is_empty());
}

#[parameterized(
    unknown_module = { br#"{"module":"hr","entity_type":"contact","remote_id":1}"# },
    unknown_entity = { br#"{"module":"crm","entity_type":"invoice","remote_id":1}"# },
)]
fn unregistered_targets_are_rejected(body: &[u8]) {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = MemoryCache::new(clock);
    let gate = WebhookGate::new(&queue, &registry, &cache);

    let err = gate.handle("caller", body).unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    assert_eq!(queue.stats().unwrap().total(), 0);
}

#[test]
fn failed_enqueue_clears_dedup_key() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = MemoryCache::new(clock);
    let gate = WebhookGate::new(&queue, &registry, &cache);

    db.conn.execute_batch("DROP TABLE sync_queue").unwrap();
    assert!(matches!(
        gate.handle("caller", BODY),
        Err(Error::Database(_))
    ));
    assert_eq!(cache.get(&gate.dedup_key(BODY)).unwrap(), None);
}

#[test]
fn rate_limited_callers_are_rejected() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = MemoryCache::new(clock);
    let limiter = RateLimiter::new(&cache, 1, Duration::from_secs(60));
    let gate = WebhookGate::new(&queue, &registry, &cache).with_rate_limiter(&limiter);

    gate.handle("10.0.0.1", BODY).unwrap();
    let err = gate
        .handle(
            "10.0.0.1",
            br#"{"module":"crm","entity_type":"contact","remote_id":7}"#,
        )
        .unwrap_err();
    assert!(err.is_rate_limited());

    // Other callers are unaffected
    gate.handle(
        "10.0.0.2",
        br#"{"module":"crm","entity_type":"contact","remote_id":7}"#,
    )
    .unwrap();
}

#[test]
fn dedup_key_uses_prefix_and_digest() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let queue = QueueManager::new(&db, clock.clone());
    let registry = registry();
    let cache = MemoryCache::new(clock);
    let gate = WebhookGate::new(&queue, &registry, &cache).with_prefix("wh_");

    let key = gate.dedup_key(BODY);
    assert!(key.starts_with("wh_"));
    assert_eq!(key.len(), 3 + 32);
}
