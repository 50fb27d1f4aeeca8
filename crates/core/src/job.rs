// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Queue job types.
//!
//! A [`Job`] is one unit of sync work: an entity-scoped create, update or
//! delete travelling in one [`Direction`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default priority for new jobs. Lower values are claimed first.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Default number of attempts before a job is terminally failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Which way a job moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Local record to remote system.
    Push,
    /// Remote record to local store.
    Pull,
}

impl Direction {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "push" => Ok(Direction::Push),
            "pull" => Ok(Direction::Pull),
            _ => Err(Error::InvalidDirection(s.to_string())),
        }
    }
}

/// What a job does to the target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Merges a newer action into a still-pending one.
    ///
    /// A pending create absorbs later updates (the entity does not exist on
    /// the other side yet), a delete always wins, and otherwise the newer
    /// action replaces the older one.
    pub fn coalesce(self, newer: Action) -> Action {
        match (self, newer) {
            (_, Action::Delete) => Action::Delete,
            (Action::Create, Action::Update) => Action::Create,
            (_, newer) => newer,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            _ => Err(Error::InvalidAction(s.to_string())),
        }
    }
}

/// Lifecycle state of a queued job.
///
/// pending -> processing -> completed, or processing -> pending (retry) until
/// attempts run out, then failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns true for statuses the queue never reprocesses on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true if a job in this status may be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// A row of the sync queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Identifier of the module that owns this job.
    pub module: String,
    pub direction: Direction,
    pub entity_type: String,
    pub local_id: Option<i64>,
    pub remote_id: Option<i64>,
    pub action: Action,
    pub payload: Option<serde_json::Value>,
    pub priority: u8,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    /// Not claimable before this instant (retry backoff).
    pub scheduled_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Returns true once the job can no longer be picked up automatically.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed => true,
            JobStatus::Failed => self.attempts >= self.max_attempts,
            JobStatus::Pending | JobStatus::Processing => false,
        }
    }
}

/// Parameters for a new queue job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub module: String,
    pub direction: Direction,
    pub entity_type: String,
    pub action: Action,
    pub local_id: Option<i64>,
    pub remote_id: Option<i64>,
    pub payload: Option<serde_json::Value>,
    pub priority: u8,
    pub max_attempts: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewJob {
    /// Creates a push job for a local entity.
    pub fn push(module: &str, entity_type: &str, action: Action, local_id: i64) -> Self {
        Self::new(module, Direction::Push, entity_type, action, Some(local_id), None)
    }

    /// Creates a pull job for a remote entity.
    pub fn pull(module: &str, entity_type: &str, action: Action, remote_id: i64) -> Self {
        Self::new(module, Direction::Pull, entity_type, action, None, Some(remote_id))
    }

    fn new(
        module: &str,
        direction: Direction,
        entity_type: &str,
        action: Action,
        local_id: Option<i64>,
        remote_id: Option<i64>,
    ) -> Self {
        NewJob {
            module: module.to_string(),
            direction,
            entity_type: entity_type.to_string(),
            action,
            local_id,
            remote_id,
            payload: None,
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_at: None,
        }
    }

    pub fn with_local_id(mut self, local_id: Option<i64>) -> Self {
        self.local_id = local_id;
        self
    }

    pub fn with_remote_id(mut self, remote_id: Option<i64>) -> Self {
        self.remote_id = remote_id;
        self
    }

    pub fn with_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: Option<DateTime<Utc>>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    /// Checks required fields before anything is written.
    pub fn validate(&self) -> Result<()> {
        if self.module.trim().is_empty() {
            return Err(Error::MissingField { field: "module" });
        }
        if self.entity_type.trim().is_empty() {
            return Err(Error::MissingField {
                field: "entity_type",
            });
        }
        match self.direction {
            Direction::Push if self.local_id.is_none() => {
                return Err(Error::MissingField { field: "local_id" });
            }
            Direction::Pull if self.remote_id.is_none() => {
                return Err(Error::MissingField { field: "remote_id" });
            }
            _ => {}
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
