// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod codes {
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const NETWORK_ERROR: &str = "network_error";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const SUBMISSION_FAILURE: &str = "submission_failure";
    pub const JOB_LOST: &str = "job_lost";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const TEMPLATE_ERROR: &str = "template_error";
    pub const CANCELED: &str = "canceled";
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// The token endpoint rejected the refresh token or client credentials.
    #[error("token exchange rejected with status {status}: {body}")]
    Auth { status: u16, body: String },

    #[error("transport error: {message}")]
    Transport { message: String, timed_out: bool },

    /// Non-success application response from the remote gateway.
    #[error("remote gateway returned status {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("{}", submission_message(.job_id.as_deref(), .message))]
    Submission {
        job_id: Option<String>,
        message: String,
    },

    #[error(
        "batch job {job_id} disappeared while pending in the queue or died immediately after starting (state: {state_text:?})"
    )]
    JobLost { job_id: String, state_text: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("batch script rendering failed: {0}")]
    Template(String),

    #[error("operation canceled")]
    Cancelled,
}

fn submission_message(job_id: Option<&str>, message: &str) -> String {
    match job_id {
        Some(id) => format!("batch job {id} submission failure: {message}"),
        None => format!("batch job submission failure: {message}"),
    }
}

impl AppError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            job_id: None,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth { .. } => codes::AUTHENTICATION_FAILURE,
            Self::Transport { .. } => codes::NETWORK_ERROR,
            Self::Remote { .. } => codes::REMOTE_ERROR,
            Self::Submission { .. } => codes::SUBMISSION_FAILURE,
            Self::JobLost { .. } => codes::JOB_LOST,
            Self::Config(_) => codes::INVALID_ARGUMENT,
            Self::Template(_) => codes::TEMPLATE_ERROR,
            Self::Cancelled => codes::CANCELED,
        }
    }

    /// A rejected credential ends the session; callers never retry it.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                timed_out: true,
                ..
            }
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_message_names_job_id_when_known() {
        let err = AppError::Submission {
            job_id: Some("353".into()),
            message: "rejected".into(),
        };
        assert_eq!(err.to_string(), "batch job 353 submission failure: rejected");
        assert_eq!(
            AppError::submission("no job id").to_string(),
            "batch job submission failure: no job id"
        );
    }

    #[test]
    fn predicates_match_variants() {
        assert!(AppError::timeout("connect timed out").is_timeout());
        assert!(!AppError::transport("reset").is_timeout());
        assert!(
            AppError::Auth {
                status: 401,
                body: String::new()
            }
            .is_fatal_auth()
        );
        assert_eq!(AppError::Cancelled.code(), codes::CANCELED);
    }
}
