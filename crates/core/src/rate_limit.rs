// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-identifier admission control.
//!
//! Two strategies share the same counter key and window:
//!
//! - **Atomic**, when the cache exposes [`AtomicCache`]: `add` the counter at
//!   1 if absent, otherwise `incr`. No read-modify-write gap.
//! - **Fallback**: read, compare, write back `count + 1`. Concurrent bursts
//!   can slip a few extra requests through, which is acceptable for abuse
//!   protection.

use std::time::Duration;

use crate::cache::{AtomicCache, Cache};
use crate::error::{Error, Result};
use crate::hash::short_digest;

/// Default counter key prefix.
pub const DEFAULT_RATE_LIMIT_PREFIX: &str = "erpsync_rl_";

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Rejected { count: i64, retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Sliding counter per identifier, stored in a shared [`Cache`].
pub struct RateLimiter<'c> {
    cache: &'c dyn Cache,
    max_requests: i64,
    window: Duration,
    prefix: String,
}

impl<'c> RateLimiter<'c> {
    pub fn new(cache: &'c dyn Cache, max_requests: i64, window: Duration) -> Self {
        RateLimiter {
            cache,
            max_requests,
            window,
            prefix: DEFAULT_RATE_LIMIT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// True when the backing cache offers atomic counters.
    pub fn is_atomic(&self) -> bool {
        self.cache.as_atomic().is_some()
    }

    /// Counter key for an identifier: prefix plus a 32-char SHA-256 digest.
    pub fn key(&self, identifier: &str) -> String {
        format!("{}{}", self.prefix, short_digest(identifier.as_bytes(), 32))
    }

    /// Counts a request from `identifier` and decides whether to admit it.
    pub fn check(&self, identifier: &str) -> Result<RateDecision> {
        let key = self.key(identifier);
        let decision = match self.cache.as_atomic() {
            Some(atomic) => self.check_atomic(atomic, &key)?,
            None => self.check_fallback(&key)?,
        };

        if let RateDecision::Rejected { count, .. } = decision {
            tracing::warn!(
                "Rate limit exceeded for '{}': {} requests in {}s window",
                identifier,
                count,
                self.window.as_secs()
            );
        }
        Ok(decision)
    }

    /// Like [`check`](Self::check), but a rejection becomes [`Error::RateLimited`].
    pub fn enforce(&self, identifier: &str) -> Result<()> {
        match self.check(identifier)? {
            RateDecision::Allowed => Ok(()),
            RateDecision::Rejected { count, retry_after } => Err(Error::RateLimited {
                identifier: identifier.to_string(),
                count,
                retry_after_secs: retry_after.as_secs(),
            }),
        }
    }

    fn check_atomic(&self, atomic: &dyn AtomicCache, key: &str) -> Result<RateDecision> {
        if atomic.add(key, "1", self.window)? {
            return Ok(self.decide(1));
        }
        match atomic.incr(key)? {
            Some(count) => Ok(self.decide(count)),
            None => {
                // Expired between add and incr: start a fresh window
                self.cache.set(key, "1", self.window)?;
                Ok(self.decide(1))
            }
        }
    }

    fn check_fallback(&self, key: &str) -> Result<RateDecision> {
        let count: i64 = self
            .cache
            .get(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if count >= self.max_requests {
            return Ok(self.rejected(count));
        }
        self.cache
            .set(key, &(count + 1).to_string(), self.window)?;
        Ok(RateDecision::Allowed)
    }

    fn decide(&self, count: i64) -> RateDecision {
        if count > self.max_requests {
            self.rejected(count)
        } else {
            RateDecision::Allowed
        }
    }

    fn rejected(&self, count: i64) -> RateDecision {
        RateDecision::Rejected {
            count,
            retry_after: self.window,
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
