// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable sync job queue.
//!
//! Jobs move `pending -> processing -> completed`. A failed attempt returns
//! the job to `pending` with a backoff `scheduled_at` until `max_attempts` is
//! reached, after which it stays `failed` and is never claimed again.
//!
//! Claiming is a single conditional `UPDATE ... RETURNING`, so concurrent
//! callers against the same store never receive the same job.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::time::Duration;

use crate::clock::{duration_ms, ms_to_datetime, SharedClock};
use crate::db::{job_from_row, Database, JOB_COLUMNS};
use crate::error::{Error, Result};
use crate::job::{
    Action, Direction, Job, JobStatus, NewJob, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY,
};
use crate::module::ModuleRegistry;

/// Upper bound on page size for [`QueueManager::list`].
pub const MAX_PER_PAGE: u32 = 500;

/// Message recorded when a stuck job is returned to the queue.
pub const STALE_RECLAIM_MESSAGE: &str = "reclaimed after stale processing";

/// Exponential retry delay: `base * 2^(attempts-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base: Duration::from_secs(60),
            max: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        RetryPolicy { base, max }
    }

    /// Delay before the next attempt, given the attempts made so far.
    ///
    /// Non-decreasing in `attempts`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// One page of [`QueueManager::list`] results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl JobPage {
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        let pages = (self.total.max(0) as u64).div_ceil(u64::from(self.per_page));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

/// The job ledger.
pub struct QueueManager<'a> {
    db: &'a Database,
    clock: SharedClock,
    retry: RetryPolicy,
    default_priority: u8,
    default_max_attempts: u32,
    registry: Option<&'a ModuleRegistry>,
}

impl<'a> QueueManager<'a> {
    pub fn new(db: &'a Database, clock: SharedClock) -> Self {
        QueueManager {
            db,
            clock,
            retry: RetryPolicy::default(),
            default_priority: DEFAULT_PRIORITY,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            registry: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the priority and attempt budget used by `enqueue_push`/`enqueue_pull`.
    pub fn with_job_defaults(mut self, priority: u8, max_attempts: u32) -> Self {
        self.default_priority = priority;
        self.default_max_attempts = max_attempts;
        self
    }

    /// Rejects jobs whose module or entity type the registry does not know.
    pub fn with_registry(mut self, registry: &'a ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn database(&self) -> &'a Database {
        self.db
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Queues a local-to-remote change.
    pub fn enqueue_push(
        &self,
        module: &str,
        entity_type: &str,
        action: Action,
        local_id: i64,
        remote_id: Option<i64>,
    ) -> Result<i64> {
        self.enqueue(
            NewJob::push(module, entity_type, action, local_id)
                .with_remote_id(remote_id)
                .with_priority(self.default_priority)
                .with_max_attempts(self.default_max_attempts),
        )
    }

    /// Queues a remote-to-local change.
    pub fn enqueue_pull(
        &self,
        module: &str,
        entity_type: &str,
        action: Action,
        remote_id: i64,
        local_id: Option<i64>,
        payload: Option<serde_json::Value>,
    ) -> Result<i64> {
        self.enqueue(
            NewJob::pull(module, entity_type, action, remote_id)
                .with_local_id(local_id)
                .with_payload(payload)
                .with_priority(self.default_priority)
                .with_max_attempts(self.default_max_attempts),
        )
    }

    /// Validates and stores a job, returning its id.
    ///
    /// If a pending job already targets the same entity in the same
    /// direction, that job absorbs the new one and its id is returned.
    pub fn enqueue(&self, job: NewJob) -> Result<i64> {
        job.validate()?;
        if let Some(registry) = self.registry {
            registry.validate(&job.module, &job.entity_type)?;
        }

        let (key_column, key) = match job.direction {
            Direction::Push => ("local_id", job.local_id),
            Direction::Pull => ("remote_id", job.remote_id),
        };
        let payload = job
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = Transaction::new_unchecked(&self.db.conn, TransactionBehavior::Immediate)?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                &format!(
                    "SELECT id, action FROM sync_queue
                     WHERE status = 'pending' AND module = ?1 AND direction = ?2
                       AND entity_type = ?3 AND {key_column} = ?4
                     ORDER BY id LIMIT 1"
                ),
                params![job.module, job.direction.as_str(), job.entity_type, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = if let Some((id, action)) = existing {
            let merged = action.parse::<Action>()?.coalesce(job.action);
            tx.execute(
                "UPDATE sync_queue SET
                     action = ?1,
                     payload = COALESCE(?2, payload),
                     priority = MIN(priority, ?3),
                     local_id = COALESCE(?4, local_id),
                     remote_id = COALESCE(?5, remote_id)
                 WHERE id = ?6",
                params![
                    merged.as_str(),
                    payload,
                    job.priority,
                    job.local_id,
                    job.remote_id,
                    id
                ],
            )?;
            tracing::debug!("Coalesced {} {} into pending job {}", job.direction, job.action, id);
            id
        } else {
            tx.execute(
                "INSERT INTO sync_queue
                     (module, direction, entity_type, local_id, remote_id, action, payload,
                      priority, status, attempts, max_attempts, scheduled_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9, ?10, ?11)",
                params![
                    job.module,
                    job.direction.as_str(),
                    job.entity_type,
                    job.local_id,
                    job.remote_id,
                    job.action.as_str(),
                    payload,
                    job.priority,
                    job.max_attempts,
                    job.scheduled_at.map(|t| t.timestamp_millis()),
                    self.clock.now_ms()
                ],
            )?;
            let id = tx.last_insert_rowid();
            tracing::debug!(
                "Enqueued job {}: {} {} {}/{}",
                id,
                job.direction,
                job.action,
                job.module,
                job.entity_type
            );
            id
        };

        tx.commit()?;
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM sync_queue WHERE id = ?1");
        self.db
            .conn
            .query_row(&sql, params![id], job_from_row)
            .optional()?
            .ok_or(Error::JobNotFound(id))
    }

    /// Atomically moves up to `limit` claimable jobs to `processing`.
    ///
    /// Returned jobs are ordered by priority, then id.
    pub fn claim_batch(&self, limit: usize) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now_ms();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let sql = format!(
            "UPDATE sync_queue SET status = 'processing', claimed_at = ?1
             WHERE id IN (
                 SELECT id FROM sync_queue
                 WHERE status = 'pending' AND (scheduled_at IS NULL OR scheduled_at <= ?1)
                 ORDER BY priority ASC, id ASC
                 LIMIT ?2
             ) AND status = 'pending'
             RETURNING {JOB_COLUMNS}"
        );
        let mut stmt = self.db.conn.prepare(&sql)?;
        let mut jobs = stmt
            .query_map(params![now, limit], job_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // RETURNING order is unspecified
        jobs.sort_by_key(|job| (job.priority, job.id));

        if !jobs.is_empty() {
            tracing::debug!("Claimed {} jobs", jobs.len());
        }
        Ok(jobs)
    }

    /// Number of jobs a claim of `limit` would return right now.
    pub fn count_claimable(&self, limit: usize) -> Result<usize> {
        let count: i64 = self.db.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue
             WHERE status = 'pending' AND (scheduled_at IS NULL OR scheduled_at <= ?1)",
            params![self.clock.now_ms()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0).min(limit))
    }

    /// Marks a processing job completed.
    pub fn complete(&self, id: i64) -> Result<()> {
        let changed = self.db.conn.execute(
            "UPDATE sync_queue SET status = 'completed', processed_at = ?1, error_message = NULL
             WHERE id = ?2 AND status = 'processing'",
            params![self.clock.now_ms(), id],
        )?;
        if changed == 0 {
            return Err(self.transition_error(id, "complete")?);
        }
        Ok(())
    }

    /// Records a failed attempt for a processing job.
    ///
    /// Returns the job's new status: `Pending` with a backoff if attempts
    /// remain, `Failed` otherwise.
    pub fn fail(&self, id: i64, message: &str) -> Result<JobStatus> {
        let tx = Transaction::new_unchecked(&self.db.conn, TransactionBehavior::Immediate)?;

        let row: Option<(String, u32, u32)> = tx
            .query_row(
                "SELECT status, attempts, max_attempts FROM sync_queue WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (status, attempts, max_attempts) = row.ok_or(Error::JobNotFound(id))?;
        if status.parse::<JobStatus>()? != JobStatus::Processing {
            return Err(Error::InvalidTransition {
                id,
                status,
                operation: "fail",
            });
        }

        let next = self.record_failure(&tx, id, attempts, max_attempts, message)?;
        tx.commit()?;
        Ok(next)
    }

    /// Fails a processing job without retry, spending its attempt budget.
    ///
    /// Used for jobs that can never succeed, such as ones naming a module
    /// that is not registered.
    pub fn reject(&self, id: i64, message: &str) -> Result<()> {
        let changed = self.db.conn.execute(
            "UPDATE sync_queue SET status = 'failed', attempts = max_attempts,
                 error_message = ?1, processed_at = ?2, claimed_at = NULL
             WHERE id = ?3 AND status = 'processing'",
            params![message, self.clock.now_ms(), id],
        )?;
        if changed == 0 {
            return Err(self.transition_error(id, "reject")?);
        }
        tracing::warn!("Job {} rejected: {}", id, message);
        Ok(())
    }

    fn record_failure(
        &self,
        tx: &Transaction<'_>,
        id: i64,
        attempts: u32,
        max_attempts: u32,
        message: &str,
    ) -> Result<JobStatus> {
        let now = self.clock.now_ms();
        let attempts = attempts.saturating_add(1).min(max_attempts);

        if attempts < max_attempts {
            let scheduled_at = now.saturating_add(duration_ms(self.retry.delay(attempts)));
            tx.execute(
                "UPDATE sync_queue SET status = 'pending', attempts = ?1, error_message = ?2,
                     scheduled_at = ?3, claimed_at = NULL
                 WHERE id = ?4",
                params![attempts, message, scheduled_at, id],
            )?;
            tracing::debug!(
                "Job {} failed (attempt {}/{}), retry at {}",
                id,
                attempts,
                max_attempts,
                ms_to_datetime(scheduled_at)
            );
            Ok(JobStatus::Pending)
        } else {
            tx.execute(
                "UPDATE sync_queue SET status = 'failed', attempts = ?1, error_message = ?2,
                     processed_at = ?3, claimed_at = NULL
                 WHERE id = ?4",
                params![attempts, message, now, id],
            )?;
            Ok(JobStatus::Failed)
        }
    }

    /// Deletes a pending or failed job. Jobs already claimed are left alone.
    pub fn cancel(&self, id: i64) -> Result<()> {
        let tx = Transaction::new_unchecked(&self.db.conn, TransactionBehavior::Immediate)?;

        let status: String = tx
            .query_row(
                "SELECT status FROM sync_queue WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(Error::JobNotFound(id))?;
        if !status.parse::<JobStatus>()?.is_cancellable() {
            return Err(Error::InvalidTransition {
                id,
                status,
                operation: "cancel",
            });
        }

        tx.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::debug!("Cancelled job {}", id);
        Ok(())
    }

    /// Resets every terminally failed job to pending with a fresh attempt budget.
    pub fn retry_failed(&self) -> Result<usize> {
        let reset = self.db.conn.execute(
            "UPDATE sync_queue SET status = 'pending', attempts = 0, scheduled_at = NULL,
                 processed_at = NULL, claimed_at = NULL
             WHERE status = 'failed'",
            [],
        )?;
        if reset > 0 {
            tracing::info!("Requeued {} failed jobs", reset);
        }
        Ok(reset)
    }

    /// Returns jobs stuck in `processing` longer than `older_than` to the queue.
    ///
    /// The interrupted run counts as a failed attempt, so a job that keeps
    /// crashing its worker still ends up terminally failed.
    pub fn reclaim_stale(&self, older_than: Duration) -> Result<usize> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(duration_ms(older_than));

        let tx = Transaction::new_unchecked(&self.db.conn, TransactionBehavior::Immediate)?;
        let stale: Vec<(i64, u32, u32)> = {
            let mut stmt = tx.prepare(
                "SELECT id, attempts, max_attempts FROM sync_queue
                 WHERE status = 'processing' AND (claimed_at IS NULL OR claimed_at <= ?1)
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![cutoff], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        for &(id, attempts, max_attempts) in &stale {
            let next =
                self.record_failure(&tx, id, attempts, max_attempts, STALE_RECLAIM_MESSAGE)?;
            tracing::warn!("Reclaimed stale job {} -> {}", id, next);
        }
        tx.commit()?;
        Ok(stale.len())
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();

        let mut stmt = self
            .db
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            match status.parse::<JobStatus>()? {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Processing => stats.processing = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }

        let last: Option<i64> = self.db.conn.query_row(
            "SELECT MAX(processed_at) FROM sync_queue WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;
        stats.last_completed_at = last.map(ms_to_datetime);
        Ok(stats)
    }

    /// Lists jobs newest first. `page` is 1-based.
    pub fn list(&self, page: u32, per_page: u32, status: Option<JobStatus>) -> Result<JobPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let offset = i64::from(page - 1) * i64::from(per_page);
        let status = status.map(|s| s.as_str());

        let total: i64 = self.db.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE ?1 IS NULL OR status = ?1",
            params![status],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM sync_queue
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY id DESC
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.db.conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![status, per_page, offset], job_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(JobPage {
            jobs,
            page,
            per_page,
            total,
        })
    }

    /// Purges completed and failed jobs finished more than `older_than_days` ago.
    pub fn cleanup(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(i64::from(older_than_days) * 86_400_000);
        let removed = self.db.conn.execute(
            "DELETE FROM sync_queue
             WHERE status IN ('completed', 'failed')
               AND COALESCE(processed_at, created_at) < ?1",
            params![cutoff],
        )?;
        if removed > 0 {
            tracing::info!("Cleaned up {} finished jobs", removed);
        }
        Ok(removed)
    }

    /// Builds the error for a status-guarded update that matched no row.
    fn transition_error(&self, id: i64, operation: &'static str) -> Result<Error> {
        let status: Option<String> = self
            .db
            .conn
            .query_row(
                "SELECT status FROM sync_queue WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match status {
            None => Error::JobNotFound(id),
            Some(status) => Error::InvalidTransition {
                id,
                status,
                operation,
            },
        })
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
