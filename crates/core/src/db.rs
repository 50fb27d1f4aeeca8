// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed store for the sync subsystem.
//!
//! The [`Database`] struct owns the connection and schema. Queue, entity map,
//! lock and cache operations are implemented by the components in their own
//! modules on top of [`Database::conn`].

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::clock::ms_to_datetime;
use crate::error::{Error, Result};
use crate::job::Job;

/// SQL schema for the sync store.
pub const SCHEMA: &str = r#"
-- Job ledger
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module TEXT NOT NULL,
    direction TEXT NOT NULL,     -- push|pull
    entity_type TEXT NOT NULL,
    local_id INTEGER,
    remote_id INTEGER,
    action TEXT NOT NULL,        -- create|update|delete
    payload TEXT,                -- JSON
    priority INTEGER NOT NULL DEFAULT 5,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    error_message TEXT,
    scheduled_at INTEGER,        -- unix ms
    claimed_at INTEGER,
    processed_at INTEGER,
    created_at INTEGER NOT NULL,
    CHECK (attempts <= max_attempts)
);

-- Local <-> remote identity correlation
CREATE TABLE IF NOT EXISTS entity_map (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    local_id INTEGER NOT NULL,
    remote_id INTEGER NOT NULL,
    remote_model TEXT NOT NULL,
    sync_hash TEXT,
    last_synced_at INTEGER NOT NULL,
    UNIQUE (module, entity_type, local_id, remote_id)
);

-- Named mutexes shared by every process using this store
CREATE TABLE IF NOT EXISTS advisory_locks (
    name TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Expiring key/value entries (rate counters, webhook dedup keys)
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Process-wide persisted counters and timestamps
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_queue_claim ON sync_queue(status, priority, id);
CREATE INDEX IF NOT EXISTS idx_queue_scheduled ON sync_queue(status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_queue_entity ON sync_queue(module, direction, entity_type, status);
CREATE INDEX IF NOT EXISTS idx_entity_local ON entity_map(module, entity_type, local_id);
CREATE INDEX IF NOT EXISTS idx_entity_remote ON entity_map(module, entity_type, remote_id);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
"#;

/// Column list shared by every query that materializes a [`Job`].
pub(crate) const JOB_COLUMNS: &str = "id, module, direction, entity_type, local_id, remote_id, \
     action, payload, priority, status, attempts, max_attempts, error_message, \
     scheduled_at, claimed_at, processed_at, created_at";

/// Parse a string value from the database, returning a rusqlite error on parse failure.
pub(crate) fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid value '{value}' in column '{column}'"
            ))),
        )
    })
}

/// Parse an optional JSON payload column.
fn parse_payload(
    value: Option<String>,
) -> std::result::Result<Option<serde_json::Value>, rusqlite::Error> {
    match value {
        None => Ok(None),
        Some(s) => serde_json::from_str(&s).map(Some).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(Error::CorruptedData("invalid JSON in column 'payload'".into())),
            )
        }),
    }
}

/// Map a row selected with [`JOB_COLUMNS`] into a [`Job`].
pub(crate) fn job_from_row(row: &Row<'_>) -> std::result::Result<Job, rusqlite::Error> {
    let direction: String = row.get(2)?;
    let action: String = row.get(6)?;
    let payload: Option<String> = row.get(7)?;
    let status: String = row.get(9)?;
    let scheduled_at: Option<i64> = row.get(13)?;
    let claimed_at: Option<i64> = row.get(14)?;
    let processed_at: Option<i64> = row.get(15)?;
    let created_at: i64 = row.get(16)?;

    Ok(Job {
        id: row.get(0)?,
        module: row.get(1)?,
        direction: parse_db(&direction, "direction")?,
        entity_type: row.get(3)?,
        local_id: row.get(4)?,
        remote_id: row.get(5)?,
        action: parse_db(&action, "action")?,
        payload: parse_payload(payload)?,
        priority: row.get(8)?,
        status: parse_db(&status, "status")?,
        attempts: row.get(10)?,
        max_attempts: row.get(11)?,
        error_message: row.get(12)?,
        scheduled_at: scheduled_at.map(ms_to_datetime),
        claimed_at: claimed_at.map(ms_to_datetime),
        processed_at: processed_at.map(ms_to_datetime),
        created_at: ms_to_datetime(created_at),
    })
}

/// Applies the canonical schema to a database connection.
///
/// Every statement is `IF NOT EXISTS`, so running it on an existing store
/// is a no-op.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// SQLite database connection holding the sync store.
pub struct Database {
    /// The underlying SQLite connection.
    pub conn: Connection,
}

impl Database {
    /// Open a database connection at the given path, creating and migrating if needed.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL lets readers proceed while another process claims jobs;
        // busy_timeout serializes concurrent writers instead of failing them.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let db = Database { conn };
        run_migrations(&db.conn)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        run_migrations(&db.conn)?;
        Ok(db)
    }

    /// Read a persisted state value.
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a persisted state value, replacing any previous one.
    pub fn set_state(&self, key: &str, value: &str, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms],
        )?;
        Ok(())
    }

    /// Read a persisted integer state value, defaulting to zero when absent.
    pub fn get_state_i64(&self, key: &str) -> Result<i64> {
        match self.get_state(key)? {
            None => Ok(0),
            Some(s) => s.parse().map_err(|_| {
                Error::CorruptedData(format!("invalid integer '{s}' for state key '{key}'"))
            }),
        }
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
