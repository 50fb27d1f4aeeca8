// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Queue draining.
//!
//! The engine claims bounded batches and runs each job through its module's
//! push or pull handler, one job at a time. A failing job is recorded through
//! [`QueueManager::fail`] and the batch moves on. Validation errors can never
//! succeed on retry, so those jobs are failed at once via
//! [`QueueManager::reject`] and kept out of the failure-rate counter.

use serde::Serialize;
use std::time::Duration;

use crate::entity_map::EntityMap;
use crate::error::{Error, ErrorKind, Result};
use crate::job::{Direction, Job, JobStatus};
use crate::lock::{DEFAULT_LOCK_LEASE, DEFAULT_LOCK_TIMEOUT};
use crate::module::{JobContext, ModuleRegistry};
use crate::notifier::FailureNotifier;
use crate::queue::QueueManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub batch_size: usize,
    pub max_batches: usize,
    pub lock_timeout: Duration,
    pub lock_lease: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            batch_size: 50,
            max_batches: 4,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_lease: DEFAULT_LOCK_LEASE,
        }
    }
}

/// A job that failed during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub job_id: i64,
    pub message: String,
    /// True once the job has no attempts left.
    pub terminal: bool,
    /// True when the job was invalid and failed without retry.
    pub rejected: bool,
}

/// Outcome of one claimed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub failures: Vec<JobFailure>,
}

pub struct SyncEngine<'a> {
    queue: &'a QueueManager<'a>,
    registry: &'a ModuleRegistry,
    entity_map: EntityMap<'a>,
    notifier: Option<&'a FailureNotifier<'a>>,
    options: EngineOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(queue: &'a QueueManager<'a>, registry: &'a ModuleRegistry) -> Self {
        SyncEngine {
            queue,
            registry,
            entity_map: EntityMap::new(queue.database(), queue.clock().clone()),
            notifier: None,
            options: EngineOptions::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: &'a FailureNotifier<'a>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Drains up to `max_batches` batches and returns the number of jobs processed.
    ///
    /// With `dry_run`, nothing is claimed or dispatched; the return value is
    /// how many jobs a real run would pick up now.
    pub fn run(&self, dry_run: bool) -> Result<usize> {
        let budget = self.options.batch_size.saturating_mul(self.options.max_batches);
        if dry_run {
            let count = self.queue.count_claimable(budget)?;
            tracing::info!("Dry run: {} jobs would be processed", count);
            return Ok(count);
        }

        let mut processed = 0;
        for _ in 0..self.options.max_batches {
            let report = self.process_batch()?;
            processed += report.claimed;
            if report.claimed < self.options.batch_size {
                break;
            }
        }
        if processed > 0 {
            tracing::info!("Sync run processed {} jobs", processed);
        }
        Ok(processed)
    }

    /// Claims and processes one batch, then reports it to the notifier.
    pub fn process_batch(&self) -> Result<BatchReport> {
        let jobs = self.queue.claim_batch(self.options.batch_size)?;
        let mut report = BatchReport {
            claimed: jobs.len(),
            ..BatchReport::default()
        };

        let ctx = JobContext::new(
            self.queue.database(),
            &self.entity_map,
            self.queue.clock().clone(),
        )
        .with_lock_timeout(self.options.lock_timeout)
        .with_lock_lease(self.options.lock_lease);

        for job in &jobs {
            match self.process_job(&ctx, job) {
                Ok(()) => report.succeeded += 1,
                Err(failure) => report.failures.push(failure),
            }
        }

        if let Some(notifier) = self.notifier {
            let failed = report.failures.iter().filter(|f| !f.rejected).count();
            notifier.check(report.succeeded, failed);
        }
        if report.claimed > 0 {
            tracing::info!(
                "Batch done: {} succeeded, {} failed",
                report.succeeded,
                report.failures.len()
            );
        }
        Ok(report)
    }

    fn process_job(&self, ctx: &JobContext<'_>, job: &Job) -> std::result::Result<(), JobFailure> {
        let outcome = self
            .dispatch(ctx, job)
            .and_then(|()| self.queue.complete(job.id));
        let err = match outcome {
            Ok(()) => {
                tracing::debug!("Job {} completed", job.id);
                return Ok(());
            }
            Err(e) => e,
        };

        let message = err.to_string();
        if err.kind() == ErrorKind::Validation {
            if let Err(e) = self.queue.reject(job.id, &message) {
                tracing::warn!("Failed to reject job {}: {}", job.id, e);
            }
            return Err(JobFailure {
                job_id: job.id,
                message,
                terminal: true,
                rejected: true,
            });
        }

        let terminal = match self.queue.fail(job.id, &message) {
            Ok(JobStatus::Failed) => {
                let exhausted = Error::AttemptsExhausted {
                    id: job.id,
                    message: message.clone(),
                };
                tracing::warn!("{}", exhausted);
                true
            }
            Ok(_) => {
                tracing::warn!("Job {} failed, will retry: {}", job.id, message);
                false
            }
            Err(e) => {
                // Left in processing; stale reclaim picks it up later
                tracing::warn!("Failed to record failure for job {}: {}", job.id, e);
                false
            }
        };
        Err(JobFailure {
            job_id: job.id,
            message,
            terminal,
            rejected: false,
        })
    }

    fn dispatch(&self, ctx: &JobContext<'_>, job: &Job) -> Result<()> {
        let module = self.registry.validate(&job.module, &job.entity_type)?;
        match job.direction {
            Direction::Push => module.push(ctx, job),
            Direction::Pull => module.pull(ctx, job),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
