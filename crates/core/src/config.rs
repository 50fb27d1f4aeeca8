// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration.
//!
//! Settings are read from a TOML file. Every section and field is optional;
//! anything left out takes its default. Example:
//!
//! ```toml
//! [database]
//! path = "/var/lib/erpsync/sync.db"
//!
//! [queue]
//! batch_size = 100
//!
//! [alerts]
//! recipient = "ops@example.com"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineOptions;
use crate::error::{Error, Result};
use crate::job::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
use crate::maintenance::{DEFAULT_CLEANUP_AFTER_DAYS, DEFAULT_STALE_AFTER};
use crate::notifier::{DEFAULT_ALERT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::queue::RetryPolicy;
use crate::rate_limit::DEFAULT_RATE_LIMIT_PREFIX;
use crate::reconcile::DEFAULT_RECONCILE_BATCH;
use crate::webhook::{DEFAULT_DEDUP_PREFIX, DEFAULT_DEDUP_TTL};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub lock: LockConfig,
    pub rate_limit: RateLimitConfig,
    pub webhook: WebhookConfig,
    pub alerts: AlertsConfig,
    pub reconcile: ReconcileConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file. When unset, the daemon picks a per-user data path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub max_batches_per_run: usize,
    pub max_attempts: u32,
    /// Lower is more urgent.
    pub default_priority: u8,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
    /// Processing jobs older than this are reclaimed.
    pub stale_after_secs: u64,
    pub cleanup_after_days: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let engine = EngineOptions::default();
        QueueConfig {
            batch_size: engine.batch_size,
            max_batches_per_run: engine.max_batches,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_priority: DEFAULT_PRIORITY,
            retry_base_secs: retry.base.as_secs(),
            retry_max_secs: retry.max.as_secs(),
            stale_after_secs: DEFAULT_STALE_AFTER.as_secs(),
            cleanup_after_days: DEFAULT_CLEANUP_AFTER_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub timeout_secs: u64,
    /// How long a lock survives a holder that never releases it.
    pub lease_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        let engine = EngineOptions::default();
        LockConfig {
            timeout_secs: engine.lock_timeout.as_secs(),
            lease_secs: engine.lock_lease.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub max_requests: i64,
    pub window_secs: u64,
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: 20,
            window_secs: 60,
            key_prefix: DEFAULT_RATE_LIMIT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    pub dedup_ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            dedup_ttl_secs: DEFAULT_DEDUP_TTL.as_secs(),
            key_prefix: DEFAULT_DEDUP_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Consecutive failures before an alert is sent.
    pub threshold: i64,
    pub cooldown_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        AlertsConfig {
            recipient: None,
            threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: DEFAULT_ALERT_COOLDOWN.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    pub batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            batch_size: DEFAULT_RECONCILE_BATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub interval_secs: u64,
    /// Log to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            interval_secs: 60,
            log_file: None,
        }
    }
}

impl Config {
    /// Loads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))
    }

    /// Rejects values no component can work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| Error::Config(format!("{field}: {reason}"));

        if self.queue.batch_size == 0 {
            return Err(invalid("queue.batch_size", "must be at least 1"));
        }
        if self.queue.max_batches_per_run == 0 {
            return Err(invalid("queue.max_batches_per_run", "must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(invalid("queue.max_attempts", "must be at least 1"));
        }
        if self.queue.retry_base_secs > self.queue.retry_max_secs {
            return Err(invalid("queue.retry_base_secs", "must not exceed retry_max_secs"));
        }
        if self.rate_limit.max_requests < 1 {
            return Err(invalid("rate_limit.max_requests", "must be at least 1"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs", "must be at least 1"));
        }
        if self.alerts.threshold < 1 {
            return Err(invalid("alerts.threshold", "must be at least 1"));
        }
        if self.reconcile.batch_size == 0 {
            return Err(invalid("reconcile.batch_size", "must be at least 1"));
        }
        if self.daemon.interval_secs == 0 {
            return Err(invalid("daemon.interval_secs", "must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.queue.retry_base_secs),
            Duration::from_secs(self.queue.retry_max_secs),
        )
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            batch_size: self.queue.batch_size,
            max_batches: self.queue.max_batches_per_run,
            lock_timeout: Duration::from_secs(self.lock.timeout_secs),
            lock_lease: Duration::from_secs(self.lock.lease_secs),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.queue.stale_after_secs)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.webhook.dedup_ttl_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alerts.cooldown_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.daemon.interval_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
