// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Remote RPC client contract.
//!
//! The transport lives outside this crate. Adapters and the reconciler only
//! see this trait, with blocking calls and client-side timeouts.

use serde_json::{Map, Value};

use crate::error::Result;

/// A record returned by [`RemoteClient::read`]: field name to value.
pub type Record = Map<String, Value>;

/// The primitives the sync subsystem needs from a remote business server.
pub trait RemoteClient {
    /// Ids of `model` records matching `filter`.
    fn search(&self, model: &str, filter: &Value, limit: Option<usize>) -> Result<Vec<i64>>;

    /// Reads the requested `fields` of existing records.
    ///
    /// Ids that no longer exist are absent from the result.
    fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Record>>;

    /// Creates a record and returns its id.
    fn create(&self, model: &str, values: &Value) -> Result<i64>;

    /// Updates existing records.
    fn write(&self, model: &str, ids: &[i64], values: &Value) -> Result<()>;

    /// Deletes records.
    fn unlink(&self, model: &str, ids: &[i64]) -> Result<()>;
}

/// The `id` field of a record, if present and integral.
pub fn record_id(record: &Record) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}
