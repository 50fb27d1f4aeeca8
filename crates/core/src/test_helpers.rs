// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used)]

use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{duration_ms, ClockSource};
use crate::error::{Error, Result};
use crate::job::{Action, Job};
use crate::module::{JobContext, ModuleBase, SyncModule};
use crate::notifier::AlertSink;
use crate::remote::{Record, RemoteClient};

/// Clock that only moves when told to.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        ManualClock {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(duration_ms(by), Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RemoteState {
    records: BTreeMap<String, BTreeMap<i64, Value>>,
    next_id: i64,
    failing: bool,
    poisoned_ids: HashSet<i64>,
    creates: usize,
    reads: usize,
}

/// Remote server kept in memory, with switchable failures.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        InMemoryRemote {
            state: Mutex::new(RemoteState {
                next_id: 1000,
                ..RemoteState::default()
            }),
        }
    }

    pub fn insert(&self, model: &str, id: i64, values: Value) {
        self.state
            .lock()
            .unwrap()
            .records
            .entry(model.to_string())
            .or_default()
            .insert(id, values);
    }

    pub fn remove(&self, model: &str, id: i64) {
        if let Some(records) = self.state.lock().unwrap().records.get_mut(model) {
            records.remove(&id);
        }
    }

    pub fn contains(&self, model: &str, id: i64) -> bool {
        self.state
            .lock()
            .unwrap()
            .records
            .get(model)
            .is_some_and(|r| r.contains_key(&id))
    }

    pub fn count(&self, model: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .get(model)
            .map_or(0, BTreeMap::len)
    }

    pub fn values(&self, model: &str, id: i64) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(model)
            .and_then(|r| r.get(&id).cloned())
    }

    /// Makes every call fail until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Makes any read that includes `id` fail.
    pub fn poison_read(&self, id: i64) {
        self.state.lock().unwrap().poisoned_ids.insert(id);
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    fn check_available(state: &RemoteState) -> Result<()> {
        if state.failing {
            return Err(Error::Remote("connection refused".to_string()));
        }
        Ok(())
    }
}

impl RemoteClient for InMemoryRemote {
    fn search(&self, model: &str, filter: &Value, limit: Option<usize>) -> Result<Vec<i64>> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        let Some(records) = state.records.get(model) else {
            return Ok(Vec::new());
        };
        let wanted = filter.as_object();
        let ids = records
            .iter()
            .filter(|(_, values)| {
                wanted.map_or(true, |w| w.iter().all(|(k, v)| values.get(k) == Some(v)))
            })
            .map(|(id, _)| *id)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(ids)
    }

    fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Record>> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        Self::check_available(&state)?;
        if ids.iter().any(|id| state.poisoned_ids.contains(id)) {
            return Err(Error::Remote("read timed out".to_string()));
        }
        let Some(records) = state.records.get(model) else {
            return Ok(Vec::new());
        };
        let found = ids
            .iter()
            .filter_map(|id| {
                let values = records.get(id)?;
                let mut record = Record::new();
                record.insert("id".to_string(), json!(id));
                for field in fields.iter().filter(|f| **f != "id") {
                    if let Some(value) = values.get(*field) {
                        record.insert(field.to_string(), value.clone());
                    }
                }
                Some(record)
            })
            .collect();
        Ok(found)
    }

    fn create(&self, model: &str, values: &Value) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        state.next_id += 1;
        state.creates += 1;
        let id = state.next_id;
        state
            .records
            .entry(model.to_string())
            .or_default()
            .insert(id, values.clone());
        Ok(id)
    }

    fn write(&self, model: &str, ids: &[i64], values: &Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        let records = state.records.entry(model.to_string()).or_default();
        for id in ids {
            let record = records
                .get_mut(id)
                .ok_or_else(|| Error::Remote(format!("{model} {id} does not exist")))?;
            *record = values.clone();
        }
        Ok(())
    }

    fn unlink(&self, model: &str, ids: &[i64]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if let Some(records) = state.records.get_mut(model) {
            for id in ids {
                records.remove(id);
            }
        }
        Ok(())
    }
}

/// Module syncing `contact` <-> `res.partner` through [`ModuleBase`].
///
/// Pushes upsert the job payload (or `{"local_id": n}`), deletes unlink.
/// Pulls are recorded. Jobs for ids registered with [`failing_on`] fail.
///
/// [`failing_on`]: RecordingModule::failing_on
pub struct RecordingModule {
    base: ModuleBase,
    failing_ids: HashSet<i64>,
    pulled: Mutex<Vec<(Action, i64)>>,
}

impl RecordingModule {
    pub fn new(id: &str, remote: Arc<InMemoryRemote>) -> Self {
        RecordingModule {
            base: ModuleBase::new(id, remote).with_model("contact", "res.partner"),
            failing_ids: HashSet::new(),
            pulled: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, id: i64) -> Self {
        self.failing_ids.insert(id);
        self
    }

    pub fn pulled(&self) -> Vec<(Action, i64)> {
        self.pulled.lock().unwrap().clone()
    }
}

impl SyncModule for RecordingModule {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn remote_models(&self) -> &BTreeMap<String, String> {
        self.base.remote_models()
    }

    fn client(&self) -> &dyn RemoteClient {
        self.base.client()
    }

    fn push(&self, ctx: &JobContext<'_>, job: &Job) -> Result<()> {
        let local_id = job
            .local_id
            .ok_or(Error::MissingField { field: "local_id" })?;
        if self.failing_ids.contains(&local_id) {
            return Err(Error::Remote(format!("remote rejected {local_id}")));
        }
        match job.action {
            Action::Create | Action::Update => {
                let values = job
                    .payload
                    .clone()
                    .unwrap_or_else(|| json!({ "local_id": local_id }));
                self.base
                    .upsert_remote(ctx, &job.entity_type, local_id, &values)?;
            }
            Action::Delete => {
                self.base.delete_remote(ctx, &job.entity_type, local_id)?;
            }
        }
        Ok(())
    }

    fn pull(&self, _ctx: &JobContext<'_>, job: &Job) -> Result<()> {
        let remote_id = job
            .remote_id
            .ok_or(Error::MissingField { field: "remote_id" })?;
        if self.failing_ids.contains(&remote_id) {
            return Err(Error::Remote(format!("remote rejected {remote_id}")));
        }
        self.pulled.lock().unwrap().push((job.action, remote_id));
        Ok(())
    }
}

/// Alert sink that remembers what it was asked to send.
#[derive(Default)]
pub struct RecordingAlertSink {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        RecordingAlertSink {
            fail: true,
            ..Self::default()
        }
    }

    /// Subjects of every attempted alert.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn send(&self, _recipient: Option<&str>, subject: &str, _body: &str) -> Result<()> {
        self.sent.lock().unwrap().push(subject.to_string());
        if self.fail {
            return Err(Error::Alert("smtp unavailable".to_string()));
        }
        Ok(())
    }
}
