// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Access token plus the (rotating) refresh token used to obtain the next one.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Already reduced by the broker's safety margin.
    pub expires_at: OffsetDateTime,
}

impl Credential {
    /// A credential holding only a refresh token; the first use forces an exchange.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.access_token.is_empty() && now < self.expires_at
    }
}

// Tokens never reach the logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Scheduler-agnostic job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobState {
    #[default]
    NotSubmitted,
    Pending,
    Running,
    Unknown,
    Gone,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::NotSubmitted => "not_submitted",
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Unknown => "unknown",
            JobState::Gone => "gone",
        }
    }

    /// States in which the job still holds (or waits for) an allocation.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            JobState::Pending | JobState::Running | JobState::Unknown
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the controller is in the job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    NotSubmitted,
    Submitting,
    Pending,
    Unknown,
    Running,
    Stopping,
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Job {
    /// Empty until the gateway hands one back.
    pub job_id: String,
    pub state: JobState,
    pub state_text: String,
    /// Only set once the job has been seen running.
    pub exec_host: String,
}

impl Job {
    pub fn has_id(&self) -> bool {
        !self.job_id.is_empty()
    }
}

/// Durable record the session manager keeps between restarts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_state_text: Option<String>,
}

/// What the session manager sees from a steady-state poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Alive,
    Terminated,
}

/// Per-launch inputs supplied by the session manager.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Command run inside the batch script.
    pub cmd: Vec<String>,
    /// Environment handed to the job.
    pub env: BTreeMap<String, String>,
    /// Caller overrides for substitution variables.
    pub user_options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressMessage {
    pub state: JobState,
    pub message: &'static str,
}
