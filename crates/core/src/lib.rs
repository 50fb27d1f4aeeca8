// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! erpsync-core: Durable sync queue between a local application and an ERP
//!
//! This crate provides the job queue, entity map, advisory locks, rate
//! limiting, webhook dedup, failure alerting and reconciliation used by
//! sync modules and by the erpsyncd maintenance daemon.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod entity_map;
pub mod error;
pub mod hash;
pub mod job;
pub mod lock;
pub mod maintenance;
pub mod module;
pub mod notifier;
pub mod queue;
pub mod rate_limit;
pub mod reconcile;
pub mod remote;
pub mod synthetic_id;
pub mod webhook;

#[cfg(test)]
mod test_helpers;

pub use cache::{AtomicCache, Cache, DbCache, MemoryCache};
pub use clock::{system_clock, ClockSource, SharedClock, SystemClock};
pub use config::Config;
pub use db::Database;
pub use engine::{BatchReport, EngineOptions, JobFailure, SyncEngine};
pub use entity_map::{EntityMap, Mapping};
pub use error::{Error, ErrorKind, Result};
pub use hash::sync_hash;
pub use job::{Action, Direction, Job, JobStatus, NewJob};
pub use lock::{with_advisory_lock, AdvisoryLock};
pub use maintenance::{Maintenance, MaintenanceReport};
pub use module::{JobContext, ModuleBase, ModuleRegistry, SyncModule, UpsertOutcome};
pub use notifier::{AlertSink, FailureNotifier, LogAlertSink};
pub use queue::{JobPage, QueueManager, QueueStats, RetryPolicy};
pub use rate_limit::{RateDecision, RateLimiter};
pub use reconcile::{Orphan, ReconcileReport, Reconciler};
pub use remote::{Record, RemoteClient};
pub use synthetic_id::{decode_synthetic_id, encode_synthetic_id};
pub use webhook::{WebhookGate, WebhookNotification, WebhookOutcome};
