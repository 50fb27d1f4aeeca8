// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync adapters ("modules") and the helpers they are built from.
//!
//! A [`SyncModule`] decides what to do with a job for the entity types it
//! owns. Shared behavior comes from composition: an adapter embeds a
//! [`ModuleBase`] holding its id, model map and client, and receives a
//! [`JobContext`] with the entity map and lock settings for each job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{ms_to_datetime, SharedClock};
use crate::db::Database;
use crate::entity_map::EntityMap;
use crate::error::{Error, Result};
use crate::hash::sync_hash;
use crate::job::Job;
use crate::lock::{with_advisory_lock, DEFAULT_LOCK_LEASE, DEFAULT_LOCK_TIMEOUT};
use crate::remote::{Record, RemoteClient};

/// Anything that can push and pull the entity types it declares.
pub trait SyncModule {
    /// Unique module identifier, stored on every job.
    fn id(&self) -> &str;

    /// Entity type -> remote model name.
    fn remote_models(&self) -> &BTreeMap<String, String>;

    fn client(&self) -> &dyn RemoteClient;

    /// Handles a local-to-remote job.
    fn push(&self, ctx: &JobContext<'_>, job: &Job) -> Result<()>;

    /// Handles a remote-to-local job.
    fn pull(&self, ctx: &JobContext<'_>, job: &Job) -> Result<()>;

    fn remote_model(&self, entity_type: &str) -> Option<&str> {
        self.remote_models().get(entity_type).map(String::as_str)
    }
}

/// Registered modules by id.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Box<dyn SyncModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. Ids must be unique.
    pub fn register(&mut self, module: Box<dyn SyncModule>) -> Result<()> {
        let id = module.id().to_string();
        if self.modules.contains_key(&id) {
            return Err(Error::DuplicateModule(id));
        }
        tracing::debug!("Registered module '{}'", id);
        self.modules.insert(id, module);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn SyncModule> {
        self.modules.get(id).map(|m| m.as_ref())
    }

    /// Looks up a module, failing with [`Error::UnknownModule`].
    pub fn resolve(&self, id: &str) -> Result<&dyn SyncModule> {
        self.get(id)
            .ok_or_else(|| Error::UnknownModule(id.to_string()))
    }

    /// Looks up a module and checks it syncs `entity_type`.
    pub fn validate(&self, id: &str, entity_type: &str) -> Result<&dyn SyncModule> {
        let module = self.resolve(id)?;
        if module.remote_model(entity_type).is_none() {
            return Err(Error::UnknownEntityType {
                module: id.to_string(),
                entity_type: entity_type.to_string(),
            });
        }
        Ok(module)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Per-job services handed to module handlers.
pub struct JobContext<'a> {
    db: &'a Database,
    entity_map: &'a EntityMap<'a>,
    clock: SharedClock,
    lock_timeout: Duration,
    lock_lease: Duration,
}

impl<'a> JobContext<'a> {
    pub fn new(db: &'a Database, entity_map: &'a EntityMap<'a>, clock: SharedClock) -> Self {
        JobContext {
            db,
            entity_map,
            clock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_lease: DEFAULT_LOCK_LEASE,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn entity_map(&self) -> &EntityMap<'a> {
        self.entity_map
    }

    pub fn now(&self) -> DateTime<Utc> {
        ms_to_datetime(self.clock.now_ms())
    }

    /// Runs `f` under the named advisory lock.
    ///
    /// A timeout surfaces as [`Error::LockTimeout`], which the engine turns
    /// into a retryable job failure.
    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        with_advisory_lock(
            self.db,
            self.clock.clone(),
            name,
            self.lock_timeout,
            self.lock_lease,
            f,
        )
    }
}

/// Result of [`ModuleBase::upsert_remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Updated(i64),
    /// Fingerprint matched the last sync; nothing was sent.
    Unchanged(i64),
}

impl UpsertOutcome {
    pub fn remote_id(&self) -> i64 {
        match *self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) | UpsertOutcome::Unchanged(id) => {
                id
            }
        }
    }
}

/// Common state and push helpers for module implementations.
pub struct ModuleBase {
    id: String,
    models: BTreeMap<String, String>,
    client: Arc<dyn RemoteClient>,
}

impl ModuleBase {
    pub fn new(id: &str, client: Arc<dyn RemoteClient>) -> Self {
        ModuleBase {
            id: id.to_string(),
            models: BTreeMap::new(),
            client,
        }
    }

    /// Declares that `entity_type` syncs with `remote_model`.
    pub fn with_model(mut self, entity_type: &str, remote_model: &str) -> Self {
        self.models
            .insert(entity_type.to_string(), remote_model.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_models(&self) -> &BTreeMap<String, String> {
        &self.models
    }

    pub fn client(&self) -> &dyn RemoteClient {
        self.client.as_ref()
    }

    pub fn remote_model(&self, entity_type: &str) -> Result<&str> {
        self.models
            .get(entity_type)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownEntityType {
                module: self.id.clone(),
                entity_type: entity_type.to_string(),
            })
    }

    /// Lock name guarding one local entity's remote counterpart.
    pub fn lock_name(&self, entity_type: &str, local_id: i64) -> String {
        format!("erpsync:{}:{}:{}", self.id, entity_type, local_id)
    }

    /// Creates or updates the remote record for a local entity.
    ///
    /// The mapping lookup and the create run under the entity's advisory
    /// lock, so concurrent pushes of the same entity cannot both create.
    pub fn upsert_remote(
        &self,
        ctx: &JobContext<'_>,
        entity_type: &str,
        local_id: i64,
        values: &Value,
    ) -> Result<UpsertOutcome> {
        let model = self.remote_model(entity_type)?;
        let hash = sync_hash(values);

        ctx.with_lock(&self.lock_name(entity_type, local_id), || {
            let map = ctx.entity_map();
            match map.get(&self.id, entity_type, local_id)? {
                Some(existing) if existing.sync_hash.as_deref() == Some(hash.as_str()) => {
                    Ok(UpsertOutcome::Unchanged(existing.remote_id))
                }
                Some(existing) => {
                    self.client.write(model, &[existing.remote_id], values)?;
                    map.save(
                        &self.id,
                        entity_type,
                        local_id,
                        existing.remote_id,
                        model,
                        Some(&hash),
                    )?;
                    Ok(UpsertOutcome::Updated(existing.remote_id))
                }
                None => {
                    let remote_id = self.client.create(model, values)?;
                    map.save(&self.id, entity_type, local_id, remote_id, model, Some(&hash))?;
                    tracing::info!(
                        "Created {} {} for {} {}",
                        model,
                        remote_id,
                        entity_type,
                        local_id
                    );
                    Ok(UpsertOutcome::Created(remote_id))
                }
            }
        })
    }

    /// Deletes the remote counterpart of a local entity and its mapping.
    ///
    /// Returns the removed remote id, or `None` if the entity was never synced.
    pub fn delete_remote(
        &self,
        ctx: &JobContext<'_>,
        entity_type: &str,
        local_id: i64,
    ) -> Result<Option<i64>> {
        let model = self.remote_model(entity_type)?;

        ctx.with_lock(&self.lock_name(entity_type, local_id), || {
            let map = ctx.entity_map();
            let Some(remote_id) = map.remote_id(&self.id, entity_type, local_id)? else {
                return Ok(None);
            };
            self.client.unlink(model, &[remote_id])?;
            map.remove(&self.id, entity_type, local_id)?;
            Ok(Some(remote_id))
        })
    }

    /// Reads one remote record, or `None` if it no longer exists.
    pub fn fetch_remote(
        &self,
        entity_type: &str,
        remote_id: i64,
        fields: &[&str],
    ) -> Result<Option<Record>> {
        let model = self.remote_model(entity_type)?;
        let mut records = self.client.read(model, &[remote_id], fields)?;
        Ok(records.pop())
    }
}

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;
