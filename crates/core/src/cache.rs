// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Expiring key/value caches backing rate counters and webhook dedup keys.
//!
//! [`Cache`] is the plain get/set surface every backend offers. Backends that
//! can also do set-if-absent and increment as single atomic operations expose
//! them through [`Cache::as_atomic`]; callers pick their strategy from that.

use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::{duration_ms, SharedClock};
use crate::db::Database;
use crate::error::{Error, Result};

/// Expiring string cache.
pub trait Cache {
    /// Returns the live value for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous entry.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Removes `key`. Returns true if a live entry was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Drops expired entries, returning how many were removed.
    fn purge_expired(&self) -> Result<usize>;

    /// Atomic operations, when the backend supports them.
    fn as_atomic(&self) -> Option<&dyn AtomicCache> {
        None
    }
}

/// Race-free primitives for counters and first-seen markers.
pub trait AtomicCache {
    /// Stores `value` only if no live entry exists. Returns true if stored.
    fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Increments an integer entry without touching its expiry.
    ///
    /// Returns `None` if the key is missing or expired.
    fn incr(&self, key: &str) -> Result<Option<i64>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: i64,
}

/// In-process cache.
///
/// Built explicitly at startup and passed to the components that need it.
/// [`MemoryCache::without_atomic`] disables the atomic surface, which makes
/// callers fall back to their best-effort path.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: SharedClock,
    atomic: bool,
}

impl MemoryCache {
    pub fn new(clock: SharedClock) -> Self {
        MemoryCache {
            entries: Mutex::new(HashMap::new()),
            clock,
            atomic: true,
        }
    }

    pub fn without_atomic(clock: SharedClock) -> Self {
        MemoryCache {
            atomic: false,
            ..MemoryCache::new(clock)
        }
    }

    /// Drops every entry.
    pub fn flush(&self) {
        self.entries().clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the guard cannot leave an entry half-written
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now_ms().saturating_add(duration_ms(ttl))
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms();
        Ok(self
            .entries()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.expiry(ttl);
        self.entries().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_ms();
        Ok(self
            .entries()
            .remove(key)
            .is_some_and(|e| e.expires_at > now))
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }

    fn as_atomic(&self) -> Option<&dyn AtomicCache> {
        if self.atomic {
            Some(self)
        } else {
            None
        }
    }
}

impl AtomicCache for MemoryCache {
    fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now_ms();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|e| e.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    fn incr(&self, key: &str) -> Result<Option<i64>> {
        let now = self.clock.now_ms();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key).filter(|e| e.expires_at > now) else {
            return Ok(None);
        };
        let current: i64 = entry.value.parse().map_err(|_| {
            Error::CorruptedData(format!("cache entry '{key}' is not an integer"))
        })?;
        let next = current.saturating_add(1);
        entry.value = next.to_string();
        Ok(Some(next))
    }
}

/// Cache stored in the `cache_entries` table, shared by every process using
/// the same database.
pub struct DbCache<'a> {
    db: &'a Database,
    clock: SharedClock,
}

impl<'a> DbCache<'a> {
    pub fn new(db: &'a Database, clock: SharedClock) -> Self {
        DbCache { db, clock }
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now_ms().saturating_add(duration_ms(ttl))
    }
}

impl Cache for DbCache<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .conn
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, self.clock.now_ms()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.db.conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, self.expiry(ttl)],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.db.conn.execute(
            "DELETE FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
            params![key, self.clock.now_ms()],
        )?;
        // Drop an expired leftover too, without reporting it
        self.db
            .conn
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn purge_expired(&self) -> Result<usize> {
        let removed = self.db.conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![self.clock.now_ms()],
        )?;
        Ok(removed)
    }

    fn as_atomic(&self) -> Option<&dyn AtomicCache> {
        Some(self)
    }
}

impl AtomicCache for DbCache<'_> {
    fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now_ms();
        let changed = self.db.conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
             WHERE cache_entries.expires_at <= ?4",
            params![key, value, self.expiry(ttl), now],
        )?;
        Ok(changed == 1)
    }

    fn incr(&self, key: &str) -> Result<Option<i64>> {
        let value = self
            .db
            .conn
            .query_row(
                "UPDATE cache_entries SET value = CAST(value AS INTEGER) + 1
                 WHERE key = ?1 AND expires_at > ?2
                 RETURNING CAST(value AS INTEGER)",
                params![key, self.clock.now_ms()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
