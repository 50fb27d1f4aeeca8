// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Drift detection between the entity map and the remote server.
//!
//! Every mapped remote id is checked for existence in batches. Ids the
//! remote no longer returns are orphans. A batch whose query fails is
//! counted as unknown rather than orphaned, so a remote outage can never
//! cause mappings to be deleted.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::entity_map::EntityMap;
use crate::error::Result;
use crate::module::ModuleRegistry;
use crate::remote::record_id;

/// Default number of remote ids checked per query.
pub const DEFAULT_RECONCILE_BATCH: usize = 200;

/// A mapping whose remote record no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub local_id: i64,
    pub remote_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Mapping rows examined.
    pub checked: usize,
    pub orphaned: Vec<Orphan>,
    /// Orphaned rows removed (only with `fix`).
    pub fixed: usize,
    /// Mapping rows whose remote query failed.
    pub unknown: usize,
}

pub struct Reconciler<'a> {
    entity_map: &'a EntityMap<'a>,
    registry: &'a ModuleRegistry,
    batch_size: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(entity_map: &'a EntityMap<'a>, registry: &'a ModuleRegistry) -> Self {
        Reconciler {
            entity_map,
            registry,
            batch_size: DEFAULT_RECONCILE_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Audits all mappings of `(module, entity_type)` against `remote_model`.
    ///
    /// With `fix`, orphaned rows are removed from the entity map.
    pub fn reconcile(
        &self,
        module: &str,
        entity_type: &str,
        remote_model: &str,
        fix: bool,
    ) -> Result<ReconcileReport> {
        let client = self.registry.resolve(module)?.client();
        let mappings = self.entity_map.mappings(module, entity_type)?;
        let mut report = ReconcileReport {
            checked: mappings.len(),
            ..ReconcileReport::default()
        };

        let remote_ids: Vec<i64> = mappings
            .iter()
            .map(|m| m.remote_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut missing: HashSet<i64> = HashSet::new();
        let mut unresolved: HashSet<i64> = HashSet::new();
        for chunk in remote_ids.chunks(self.batch_size) {
            match client.read(remote_model, chunk, &["id"]) {
                Ok(records) => {
                    let found: HashSet<i64> = records.iter().filter_map(record_id).collect();
                    missing.extend(chunk.iter().filter(|id| !found.contains(*id)));
                }
                Err(e) => {
                    tracing::warn!(
                        "Reconcile {}/{}: could not check {} remote ids: {}",
                        module,
                        entity_type,
                        chunk.len(),
                        e
                    );
                    unresolved.extend(chunk.iter().copied());
                }
            }
        }

        for mapping in &mappings {
            if unresolved.contains(&mapping.remote_id) {
                report.unknown += 1;
            } else if missing.contains(&mapping.remote_id) {
                report.orphaned.push(Orphan {
                    local_id: mapping.local_id,
                    remote_id: mapping.remote_id,
                });
            }
        }

        if fix {
            for orphan in &report.orphaned {
                if self.entity_map.remove_pair(
                    module,
                    entity_type,
                    orphan.local_id,
                    orphan.remote_id,
                )? {
                    report.fixed += 1;
                }
            }
        }

        tracing::info!(
            "Reconciled {}/{}: {} checked, {} orphaned, {} fixed, {} unknown",
            module,
            entity_type,
            report.checked,
            report.orphaned.len(),
            report.fixed,
            report.unknown
        );
        Ok(report)
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
