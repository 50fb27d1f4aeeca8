// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_helpers::ManualClock;
use std::sync::Arc;

const START_MS: i64 = 1_700_000_000_000;

fn lock_rows(db: &Database) -> i64 {
    db.conn
        .query_row("SELECT COUNT(*) FROM advisory_locks", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn acquire_twice_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut lock = AdvisoryLock::new(&db, clock, "push:contact:1");

    assert!(lock.acquire().unwrap());
    assert!(lock.acquire().unwrap());
    assert!(lock.is_held());
    assert_eq!(lock_rows(&db), 1);

    lock.release().unwrap();
    assert!(!lock.is_held());
    assert_eq!(lock_rows(&db), 0);
}

#[test]
fn release_without_acquire_is_noop() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut holder = AdvisoryLock::new(&db, clock.clone(), "shared");
    assert!(holder.acquire().unwrap());

    let mut other = AdvisoryLock::new(&db, clock, "shared");
    other.release().unwrap();
    assert!(!other.is_held());
    // The holder's row is untouched
    assert_eq!(lock_rows(&db), 1);
}

#[test]
fn contended_lock_times_out() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut first = AdvisoryLock::new(&db, clock.clone(), "shared");
    assert!(first.acquire().unwrap());

    let mut second =
        AdvisoryLock::new(&db, clock, "shared").with_timeout(Duration::from_millis(120));
    assert!(!second.acquire().unwrap());
    assert!(!second.is_held());
}

#[test]
fn different_names_do_not_contend() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut a = AdvisoryLock::new(&db, clock.clone(), "a");
    let mut b = AdvisoryLock::new(&db, clock, "b").with_timeout(Duration::ZERO);
    assert!(a.acquire().unwrap());
    assert!(b.acquire().unwrap());
}

#[test]
fn released_lock_can_be_taken_over() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut first = AdvisoryLock::new(&db, clock.clone(), "shared");
    assert!(first.acquire().unwrap());
    first.release().unwrap();

    let mut second = AdvisoryLock::new(&db, clock, "shared").with_timeout(Duration::ZERO);
    assert!(second.acquire().unwrap());
}

#[test]
fn drop_releases_held_lock() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));
    {
        let mut lock = AdvisoryLock::new(&db, clock.clone(), "scoped");
        assert!(lock.acquire().unwrap());
        assert_eq!(lock_rows(&db), 1);
    }
    assert_eq!(lock_rows(&db), 0);
}

#[test]
fn expired_lease_is_taken_over() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut abandoned =
        AdvisoryLock::new(&db, clock.clone(), "shared").with_lease(Duration::from_secs(30));
    assert!(abandoned.acquire().unwrap());

    clock.advance(Duration::from_secs(31));
    let mut next = AdvisoryLock::new(&db, clock, "shared").with_timeout(Duration::ZERO);
    assert!(next.acquire().unwrap());

    // The stale holder's release must not remove the new owner's row
    abandoned.release().unwrap();
    assert_eq!(lock_rows(&db), 1);
}

#[test]
fn failed_release_keeps_lock_held() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut lock = AdvisoryLock::new(&db, clock, "sticky");
    assert!(lock.acquire().unwrap());

    db.conn.execute_batch("DROP TABLE advisory_locks").unwrap();
    assert!(lock.release().is_err());
    assert!(lock.is_held());

    crate::db::run_migrations(&db.conn).unwrap();
    lock.release().unwrap();
    assert!(!lock.is_held());
}

#[test]
fn scoped_helper_releases_on_error() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let result: Result<()> = with_advisory_lock(
        &db,
        clock.clone(),
        "scoped",
        DEFAULT_LOCK_TIMEOUT,
        DEFAULT_LOCK_LEASE,
        || Err(Error::Remote("create failed".into())),
    );
    assert!(matches!(result, Err(Error::Remote(_))));
    assert_eq!(lock_rows(&db), 0);

    let value = with_advisory_lock(
        &db,
        clock,
        "scoped",
        DEFAULT_LOCK_TIMEOUT,
        DEFAULT_LOCK_LEASE,
        || Ok(42),
    )
    .unwrap();
    assert_eq!(value, 42);
}

#[test]
fn scoped_helper_times_out() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut holder = AdvisoryLock::new(&db, clock.clone(), "busy");
    assert!(holder.acquire().unwrap());

    let mut ran = false;
    let result = with_advisory_lock(
        &db,
        clock,
        "busy",
        Duration::from_millis(60),
        DEFAULT_LOCK_LEASE,
        || {
            ran = true;
            Ok(())
        },
    );
    assert!(matches!(result, Err(Error::LockTimeout { ref name, .. }) if name == "busy"));
    assert!(!ran);
}

#[test]
fn purge_removes_only_expired_rows() {
    let db = Database::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut short = AdvisoryLock::new(&db, clock.clone(), "short").with_lease(Duration::from_secs(10));
    let mut long = AdvisoryLock::new(&db, clock.clone(), "long").with_lease(Duration::from_secs(600));
    assert!(short.acquire().unwrap());
    assert!(long.acquire().unwrap());

    assert_eq!(purge_expired_locks(&db, START_MS + 60_000).unwrap(), 1);
    assert_eq!(lock_rows(&db), 1);
}

#[test]
fn exclusive_across_connections() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("sync.db");
    let first_db = Database::open(&path).unwrap();
    let second_db = Database::open(&path).unwrap();
    let clock = Arc::new(ManualClock::new(START_MS));

    let mut first = AdvisoryLock::new(&first_db, clock.clone(), "shared");
    let mut second =
        AdvisoryLock::new(&second_db, clock, "shared").with_timeout(Duration::from_millis(60));

    assert!(first.acquire().unwrap());
    assert!(!second.acquire().unwrap());
    first.release().unwrap();
    assert!(second.acquire().unwrap());
}
