// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Named advisory locks shared through the store.
//!
//! A lock is a row in `advisory_locks`. Acquisition is a single upsert that
//! only takes over a row whose lease has expired, so at most one owner holds
//! a name at any instant. The lease stands in for connection-scoped release:
//! if a holder dies without releasing, the name frees up once the lease
//! runs out.

use rusqlite::params;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::{duration_ms, SharedClock};
use crate::db::Database;
use crate::error::{Error, Result};

/// Default time to wait for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default lease after which an unreleased lock is considered abandoned.
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

static OWNER_SEQ: AtomicU64 = AtomicU64::new(0);

fn owner_token(now_ms: i64) -> String {
    let seq = OWNER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", std::process::id(), seq, now_ms)
}

/// A named lock handle. Releases on drop if still held.
pub struct AdvisoryLock<'a> {
    db: &'a Database,
    clock: SharedClock,
    name: String,
    owner: String,
    timeout: Duration,
    lease: Duration,
    held: bool,
}

impl<'a> AdvisoryLock<'a> {
    pub fn new(db: &'a Database, clock: SharedClock, name: &str) -> Self {
        let owner = owner_token(clock.now_ms());
        AdvisoryLock {
            db,
            clock,
            name: name.to_string(),
            owner,
            timeout: DEFAULT_LOCK_TIMEOUT,
            lease: DEFAULT_LOCK_LEASE,
            held: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Waits up to the timeout for the lock. Returns true iff it is held.
    ///
    /// Returns true immediately if this handle already holds it.
    pub fn acquire(&mut self) -> Result<bool> {
        if self.held {
            return Ok(true);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if self.try_acquire()? {
                self.held = true;
                tracing::debug!("Acquired lock '{}'", self.name);
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Timed out waiting for lock '{}'", self.name);
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn try_acquire(&self) -> Result<bool> {
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add(duration_ms(self.lease));
        let changed = self.db.conn.execute(
            "INSERT INTO advisory_locks (name, owner, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 owner = excluded.owner,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
             WHERE advisory_locks.expires_at <= ?3",
            params![self.name, self.owner, now, expires_at],
        )?;
        Ok(changed == 1)
    }

    /// Releases the lock. No-op if not held.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        // Stays held if the delete fails so a later release can retry
        let removed = self.db.conn.execute(
            "DELETE FROM advisory_locks WHERE name = ?1 AND owner = ?2",
            params![self.name, self.owner],
        )?;
        self.held = false;
        if removed == 0 {
            tracing::warn!("Lock '{}' was lost before release (lease expired)", self.name);
        } else {
            tracing::debug!("Released lock '{}'", self.name);
        }
        Ok(())
    }
}

impl Drop for AdvisoryLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release lock '{}': {}", self.name, e);
        }
    }
}

/// Runs `f` while holding the named lock, releasing it on every exit path.
///
/// Fails with [`Error::LockTimeout`] if the lock is not acquired in time.
pub fn with_advisory_lock<T>(
    db: &Database,
    clock: SharedClock,
    name: &str,
    timeout: Duration,
    lease: Duration,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let mut lock = AdvisoryLock::new(db, clock, name)
        .with_timeout(timeout)
        .with_lease(lease);
    if !lock.acquire()? {
        return Err(Error::LockTimeout {
            name: name.to_string(),
            timeout_ms: timeout.as_millis(),
        });
    }
    let result = f();
    let released = lock.release();
    let value = result?;
    released?;
    Ok(value)
}

/// Deletes lock rows whose lease has expired.
pub fn purge_expired_locks(db: &Database, now_ms: i64) -> Result<usize> {
    let removed = db.conn.execute(
        "DELETE FROM advisory_locks WHERE expires_at <= ?1",
        params![now_ms],
    )?;
    Ok(removed)
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
