// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Bidirectional local <-> remote identity map.
//!
//! Each row correlates `(module, entity_type, local_id)` with
//! `(remote_id, remote_model)` and remembers the fingerprint of the fields
//! last written, so unchanged records can skip a remote round-trip.
//!
//! Uniqueness is a single composite key over the 4-tuple; `save` replaces on
//! conflict. When stale rows leave several matches for one side of the key,
//! lookups return the most recently synced one.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;

use crate::clock::{ms_to_datetime, SharedClock};
use crate::db::Database;
use crate::error::Result;

/// One identity correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub module: String,
    pub entity_type: String,
    pub local_id: i64,
    pub remote_id: i64,
    pub remote_model: String,
    pub sync_hash: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

const MAPPING_COLUMNS: &str =
    "module, entity_type, local_id, remote_id, remote_model, sync_hash, last_synced_at";

fn mapping_from_row(row: &Row<'_>) -> std::result::Result<Mapping, rusqlite::Error> {
    let last_synced_at: i64 = row.get(6)?;
    Ok(Mapping {
        module: row.get(0)?,
        entity_type: row.get(1)?,
        local_id: row.get(2)?,
        remote_id: row.get(3)?,
        remote_model: row.get(4)?,
        sync_hash: row.get(5)?,
        last_synced_at: ms_to_datetime(last_synced_at),
    })
}

/// Repository over the `entity_map` table.
pub struct EntityMap<'a> {
    db: &'a Database,
    clock: SharedClock,
}

impl<'a> EntityMap<'a> {
    pub fn new(db: &'a Database, clock: SharedClock) -> Self {
        EntityMap { db, clock }
    }

    /// Records a correlation. Idempotent for identical arguments.
    pub fn save(
        &self,
        module: &str,
        entity_type: &str,
        local_id: i64,
        remote_id: i64,
        remote_model: &str,
        sync_hash: Option<&str>,
    ) -> Result<()> {
        self.db.conn.execute(
            "INSERT OR REPLACE INTO entity_map
                 (module, entity_type, local_id, remote_id, remote_model, sync_hash, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                module,
                entity_type,
                local_id,
                remote_id,
                remote_model,
                sync_hash,
                self.clock.now_ms()
            ],
        )?;
        tracing::debug!(
            "Mapped {}/{} local {} -> remote {}",
            module,
            entity_type,
            local_id,
            remote_id
        );
        Ok(())
    }

    /// Returns the full row for a local record.
    pub fn get(&self, module: &str, entity_type: &str, local_id: i64) -> Result<Option<Mapping>> {
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM entity_map
             WHERE module = ?1 AND entity_type = ?2 AND local_id = ?3
             ORDER BY last_synced_at DESC, id DESC LIMIT 1"
        );
        let mapping = self
            .db
            .conn
            .query_row(&sql, params![module, entity_type, local_id], mapping_from_row)
            .optional()?;
        Ok(mapping)
    }

    /// Returns the full row for a remote record.
    pub fn get_by_remote(
        &self,
        module: &str,
        entity_type: &str,
        remote_id: i64,
    ) -> Result<Option<Mapping>> {
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM entity_map
             WHERE module = ?1 AND entity_type = ?2 AND remote_id = ?3
             ORDER BY last_synced_at DESC, id DESC LIMIT 1"
        );
        let mapping = self
            .db
            .conn
            .query_row(&sql, params![module, entity_type, remote_id], mapping_from_row)
            .optional()?;
        Ok(mapping)
    }

    pub fn remote_id(&self, module: &str, entity_type: &str, local_id: i64) -> Result<Option<i64>> {
        Ok(self.get(module, entity_type, local_id)?.map(|m| m.remote_id))
    }

    pub fn local_id(&self, module: &str, entity_type: &str, remote_id: i64) -> Result<Option<i64>> {
        Ok(self
            .get_by_remote(module, entity_type, remote_id)?
            .map(|m| m.local_id))
    }

    /// Batch lookup: local id -> remote id for every mapped input.
    pub fn remote_ids(
        &self,
        module: &str,
        entity_type: &str,
        local_ids: &[i64],
    ) -> Result<HashMap<i64, i64>> {
        self.lookup_many(module, entity_type, "local_id", "remote_id", local_ids)
    }

    /// Batch lookup: remote id -> local id for every mapped input.
    pub fn local_ids(
        &self,
        module: &str,
        entity_type: &str,
        remote_ids: &[i64],
    ) -> Result<HashMap<i64, i64>> {
        self.lookup_many(module, entity_type, "remote_id", "local_id", remote_ids)
    }

    fn lookup_many(
        &self,
        module: &str,
        entity_type: &str,
        from: &str,
        to: &str,
        ids: &[i64],
    ) -> Result<HashMap<i64, i64>> {
        let mut found = HashMap::new();
        if ids.is_empty() {
            return Ok(found);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        // Ascending order so the most recent row for a key is inserted last
        let sql = format!(
            "SELECT {from}, {to} FROM entity_map
             WHERE module = ? AND entity_type = ? AND {from} IN ({placeholders})
             ORDER BY last_synced_at ASC, id ASC"
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(ids.len() + 2);
        values.push(module.to_string().into());
        values.push(entity_type.to_string().into());
        values.extend(ids.iter().map(|&id| rusqlite::types::Value::from(id)));

        let mut stmt = self.db.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            found.insert(key, value);
        }
        Ok(found)
    }

    /// Stored fingerprint for a local record.
    pub fn sync_hash(
        &self,
        module: &str,
        entity_type: &str,
        local_id: i64,
    ) -> Result<Option<String>> {
        Ok(self
            .get(module, entity_type, local_id)?
            .and_then(|m| m.sync_hash))
    }

    /// Returns true unless the stored fingerprint equals `hash`.
    ///
    /// Unmapped records and rows without a fingerprint count as changed.
    pub fn has_changed(
        &self,
        module: &str,
        entity_type: &str,
        local_id: i64,
        hash: &str,
    ) -> Result<bool> {
        let stored = self.sync_hash(module, entity_type, local_id)?;
        Ok(stored.as_deref() != Some(hash))
    }

    /// All rows for an entity type, oldest first.
    pub fn mappings(&self, module: &str, entity_type: &str) -> Result<Vec<Mapping>> {
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM entity_map
             WHERE module = ?1 AND entity_type = ?2
             ORDER BY id"
        );
        let mut stmt = self.db.conn.prepare(&sql)?;
        let mappings = stmt
            .query_map(params![module, entity_type], mapping_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    pub fn count(&self, module: &str, entity_type: &str) -> Result<i64> {
        let count = self.db.conn.query_row(
            "SELECT COUNT(*) FROM entity_map WHERE module = ?1 AND entity_type = ?2",
            params![module, entity_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Removes every row for a local record. Returns the number removed.
    pub fn remove(&self, module: &str, entity_type: &str, local_id: i64) -> Result<usize> {
        let removed = self.db.conn.execute(
            "DELETE FROM entity_map WHERE module = ?1 AND entity_type = ?2 AND local_id = ?3",
            params![module, entity_type, local_id],
        )?;
        Ok(removed)
    }

    /// Removes exactly one correlation. Returns false if it did not exist.
    pub fn remove_pair(
        &self,
        module: &str,
        entity_type: &str,
        local_id: i64,
        remote_id: i64,
    ) -> Result<bool> {
        let removed = self.db.conn.execute(
            "DELETE FROM entity_map
             WHERE module = ?1 AND entity_type = ?2 AND local_id = ?3 AND remote_id = ?4",
            params![module, entity_type, local_id, remote_id],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
#[path = "entity_map_tests.rs"]
mod tests;
