// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for erpsync-core operations.

use thiserror::Error;

/// Coarse classification of failures, used to decide whether work is retried,
/// rejected at the boundary, or logged and swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried through the queue's attempts/backoff mechanism.
    Transient,
    /// Rejected immediately; no job is created.
    Validation,
    /// Attempts exhausted.
    Terminal,
    /// Storage, notification and other infrastructure failures.
    Systemic,
}

/// All possible errors that can occur in erpsync-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("job not found: {0}")]
    JobNotFound(i64),

    #[error("invalid job transition for job {id}: cannot {operation} a {status} job")]
    InvalidTransition {
        id: i64,
        status: String,
        operation: &'static str,
    },

    #[error("invalid job status: '{0}'\n  hint: valid statuses are: pending, processing, completed, failed")]
    InvalidStatus(String),

    #[error("invalid direction: '{0}'\n  hint: valid directions are: push, pull")]
    InvalidDirection(String),

    #[error("invalid action: '{0}'\n  hint: valid actions are: create, update, delete")]
    InvalidAction(String),

    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("{0}")]
    InvalidInput(String),

    #[error("unknown module: '{0}'")]
    UnknownModule(String),

    #[error("module '{module}' does not sync entity type '{entity_type}'")]
    UnknownEntityType { module: String, entity_type: String },

    #[error("module already registered: '{0}'")]
    DuplicateModule(String),

    #[error("secondary id {0} out of range\n  hint: secondary ids must be below 1000000")]
    SyntheticIdOutOfRange(u64),

    #[error("synthetic id overflow for primary id {0}")]
    SyntheticIdOverflow(u64),

    #[error("timed out acquiring lock '{name}' after {timeout_ms}ms")]
    LockTimeout { name: String, timeout_ms: u128 },

    #[error("rate limit exceeded for {identifier} ({count} requests)\n  hint: retry after {retry_after_secs}s")]
    RateLimited {
        identifier: String,
        count: i64,
        retry_after_secs: u64,
    },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("max attempts exhausted for job {id}: {message}")]
    AttemptsExhausted { id: i64, message: String },

    #[error("alert delivery failed: {0}")]
    Alert(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

impl Error {
    /// Classifies this error for retry and propagation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::LockTimeout { .. } | Error::RateLimited { .. } | Error::Remote(_) => {
                ErrorKind::Transient
            }
            Error::JobNotFound(_)
            | Error::InvalidTransition { .. }
            | Error::InvalidStatus(_)
            | Error::InvalidDirection(_)
            | Error::InvalidAction(_)
            | Error::MissingField { .. }
            | Error::InvalidInput(_)
            | Error::UnknownModule(_)
            | Error::UnknownEntityType { .. }
            | Error::DuplicateModule(_)
            | Error::SyntheticIdOutOfRange(_)
            | Error::SyntheticIdOverflow(_) => ErrorKind::Validation,
            Error::AttemptsExhausted { .. } => ErrorKind::Terminal,
            Error::Alert(_)
            | Error::Config(_)
            | Error::Database(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::CorruptedData(_) => ErrorKind::Systemic,
        }
    }

    /// Returns true if the caller was rejected by a rate limiter.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Returns true if the failed work should be retried later.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// A specialized Result type for erpsync-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
