// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound change notifications.
//!
//! A notification body names a remote record that changed. The gate turns it
//! into a pull job, dropping byte-identical bodies seen within the dedup
//! window (remote servers retry webhooks after timeouts).

use serde::Deserialize;
use std::time::Duration;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::hash::short_digest;
use crate::job::Action;
use crate::module::ModuleRegistry;
use crate::queue::QueueManager;
use crate::rate_limit::RateLimiter;

pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_DEDUP_PREFIX: &str = "erpsync_wh_";

/// Fields the gate reads from a notification body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookNotification {
    pub module: String,
    pub entity_type: String,
    pub remote_id: i64,
    #[serde(default = "default_action")]
    pub action: Action,
}

fn default_action() -> Action {
    Action::Update
}

impl WebhookNotification {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::InvalidInput(format!("invalid webhook payload: {e}")))
    }
}

/// What the gate did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Enqueued { job_id: i64 },
    /// Identical body seen within the window; nothing was enqueued.
    Duplicate,
}

pub struct WebhookGate<'a> {
    queue: &'a QueueManager<'a>,
    registry: &'a ModuleRegistry,
    cache: &'a dyn Cache,
    limiter: Option<&'a RateLimiter<'a>>,
    ttl: Duration,
    prefix: String,
}

impl<'a> WebhookGate<'a> {
    pub fn new(
        queue: &'a QueueManager<'a>,
        registry: &'a ModuleRegistry,
        cache: &'a dyn Cache,
    ) -> Self {
        WebhookGate {
            queue,
            registry,
            cache,
            limiter: None,
            ttl: DEFAULT_DEDUP_TTL,
            prefix: DEFAULT_DEDUP_PREFIX.to_string(),
        }
    }

    /// Rate-limits callers before anything else is done.
    pub fn with_rate_limiter(mut self, limiter: &'a RateLimiter<'a>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Dedup key: prefix plus the first 32 hex chars of SHA-256(body).
    pub fn dedup_key(&self, body: &[u8]) -> String {
        format!("{}{}", self.prefix, short_digest(body, 32))
    }

    /// Admits one notification from `caller`.
    ///
    /// Malformed bodies and unknown module/entity pairs are rejected without
    /// touching the dedup cache. A duplicate is a successful no-op.
    pub fn handle(&self, caller: &str, body: &[u8]) -> Result<WebhookOutcome> {
        if let Some(limiter) = self.limiter {
            limiter.enforce(caller)?;
        }

        let notification = WebhookNotification::parse(body)?;
        self.registry
            .validate(&notification.module, &notification.entity_type)?;
        let payload: serde_json::Value = serde_json::from_slice(body)?;

        let key = self.dedup_key(body);
        if !self.mark_seen(&key)? {
            tracing::info!(
                "Duplicate webhook for {}/{} {} ignored",
                notification.module,
                notification.entity_type,
                notification.remote_id
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        let enqueued = self.queue.enqueue_pull(
            &notification.module,
            &notification.entity_type,
            notification.action,
            notification.remote_id,
            None,
            Some(payload),
        );
        match enqueued {
            Ok(job_id) => Ok(WebhookOutcome::Enqueued { job_id }),
            Err(e) => {
                // Let the sender's retry through
                if let Err(cleanup) = self.cache.delete(&key) {
                    tracing::warn!("Failed to clear webhook dedup key: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Records the key. Returns false if it was already present.
    fn mark_seen(&self, key: &str) -> Result<bool> {
        if let Some(atomic) = self.cache.as_atomic() {
            return atomic.add(key, "1", self.ttl);
        }
        if self.cache.get(key)?.is_some() {
            return Ok(false);
        }
        self.cache.set(key, "1", self.ttl)?;
        Ok(true)
    }
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
