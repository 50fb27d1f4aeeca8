// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic housekeeping for the queue, cache and lock tables.

use serde::Serialize;
use std::time::Duration;

use crate::cache::Cache;
use crate::error::Result;
use crate::lock::purge_expired_locks;
use crate::queue::{QueueManager, QueueStats};

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(900);
pub const DEFAULT_CLEANUP_AFTER_DAYS: u32 = 7;

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub reclaimed: usize,
    pub cleaned: usize,
    pub cache_purged: usize,
    pub locks_purged: usize,
    /// Queue counts after the pass.
    pub stats: QueueStats,
}

pub struct Maintenance<'a> {
    queue: &'a QueueManager<'a>,
    cache: &'a dyn Cache,
    stale_after: Duration,
    cleanup_after_days: u32,
}

impl<'a> Maintenance<'a> {
    pub fn new(queue: &'a QueueManager<'a>, cache: &'a dyn Cache) -> Self {
        Maintenance {
            queue,
            cache,
            stale_after: DEFAULT_STALE_AFTER,
            cleanup_after_days: DEFAULT_CLEANUP_AFTER_DAYS,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_cleanup_after_days(mut self, days: u32) -> Self {
        self.cleanup_after_days = days;
        self
    }

    /// Runs every housekeeping step once.
    pub fn run_once(&self) -> Result<MaintenanceReport> {
        let reclaimed = self.queue.reclaim_stale(self.stale_after)?;
        let cleaned = self.queue.cleanup(self.cleanup_after_days)?;
        let cache_purged = self.cache.purge_expired()?;
        let locks_purged =
            purge_expired_locks(self.queue.database(), self.queue.clock().now_ms())?;
        let stats = self.queue.stats()?;

        tracing::debug!(
            "Maintenance: {} reclaimed, {} cleaned, {} cache entries and {} locks purged",
            reclaimed,
            cleaned,
            cache_purged,
            locks_purged
        );
        Ok(MaintenanceReport {
            reclaimed,
            cleaned,
            cache_purged,
            locks_purged,
            stats,
        })
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
