// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Consecutive-failure alerting.
//!
//! Batch outcomes feed a persisted counter. Any success resets it; once it
//! reaches the threshold an alert goes out, at most once per cooldown.
//! Nothing here ever returns an error to the queue: storage and delivery
//! problems are logged and dropped.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::{duration_ms, ms_to_datetime, SharedClock};
use crate::db::Database;
use crate::error::{Error, Result};

pub const DEFAULT_FAILURE_THRESHOLD: i64 = 5;
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(3600);

const FAILURES_KEY: &str = "consecutive_failures";
const LAST_ALERT_KEY: &str = "last_alert_at";

/// Delivery channel for operator alerts.
pub trait AlertSink {
    fn send(&self, recipient: Option<&str>, subject: &str, body: &str) -> Result<()>;
}

/// Writes alerts to the log at error level. Requires a recipient, so an
/// unconfigured deployment reports the delivery failure instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, recipient: Option<&str>, subject: &str, body: &str) -> Result<()> {
        let Some(recipient) = recipient else {
            return Err(Error::Alert("no alert recipient configured".to_string()));
        };
        tracing::error!("Alert for {}: {}: {}", recipient, subject, body);
        Ok(())
    }
}

pub struct FailureNotifier<'a> {
    db: &'a Database,
    clock: SharedClock,
    sink: &'a dyn AlertSink,
    recipient: Option<String>,
    threshold: i64,
    cooldown: Duration,
}

impl<'a> FailureNotifier<'a> {
    pub fn new(db: &'a Database, clock: SharedClock, sink: &'a dyn AlertSink) -> Self {
        FailureNotifier {
            db,
            clock,
            sink,
            recipient: None,
            threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_ALERT_COOLDOWN,
        }
    }

    pub fn with_recipient(mut self, recipient: Option<String>) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Records a batch outcome. Never fails.
    pub fn check(&self, successes: usize, failures: usize) {
        if let Err(e) = self.record(successes, failures) {
            tracing::warn!("Failed to record sync outcome: {}", e);
        }
    }

    pub fn consecutive_failures(&self) -> Result<i64> {
        self.db.get_state_i64(FAILURES_KEY)
    }

    pub fn last_alert_at(&self) -> Result<Option<DateTime<Utc>>> {
        let ms = self.db.get_state_i64(LAST_ALERT_KEY)?;
        Ok((ms > 0).then(|| ms_to_datetime(ms)))
    }

    fn record(&self, successes: usize, failures: usize) -> Result<()> {
        let now = self.clock.now_ms();

        if successes > 0 {
            if self.consecutive_failures()? != 0 {
                self.db.set_state(FAILURES_KEY, "0", now)?;
                tracing::info!("Sync recovered, failure counter reset");
            }
            return Ok(());
        }
        if failures == 0 {
            return Ok(());
        }

        let added = i64::try_from(failures).unwrap_or(i64::MAX);
        let count = self.consecutive_failures()?.saturating_add(added);
        self.db.set_state(FAILURES_KEY, &count.to_string(), now)?;
        if count < self.threshold {
            return Ok(());
        }

        let last = self.db.get_state_i64(LAST_ALERT_KEY)?;
        if last > 0 && now.saturating_sub(last) <= duration_ms(self.cooldown) {
            tracing::debug!("{} consecutive failures, alert cooling down", count);
            return Ok(());
        }

        // Recorded before sending so a broken sink is not retried every batch
        self.db.set_state(LAST_ALERT_KEY, &now.to_string(), now)?;

        let subject = format!("Sync failing: {count} consecutive failures");
        let body = format!(
            "The sync queue has recorded {count} consecutive failed jobs with no success in between. \
             Check failed jobs and the remote connection."
        );
        match self.sink.send(self.recipient.as_deref(), &subject, &body) {
            Ok(()) => tracing::info!("Sent failure alert ({} consecutive failures)", count),
            Err(e) => tracing::warn!("Failed to send failure alert: {}", e),
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "notifier_tests.rs"]
mod tests;
