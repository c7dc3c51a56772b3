// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use regex::Regex;

use crate::app::errors::{AppError, AppResult};
use crate::app::types::JobState;

// Slurm long-form states:
// PENDING, CONFIGURING = pending
// RUNNING, COMPLETING = running
pub const SLURM_PENDING_PATTERN: &str = r"^(?:PENDING|CONFIGURING)";
pub const SLURM_RUNNING_PATTERN: &str = r"^(?:RUNNING|COMPLETING)";
pub const SLURM_UNKNOWN_PATTERN: &str = r"^slurm_load_jobs error: (?:Socket timed out on send/recv|Unable to contact slurm controller)";
pub const SLURM_EXEC_HOST_PATTERN: &str = r"\s+((?:[\w_-]+\.?)+)$";

/// Pattern sources, usually straight from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePatterns {
    pub pending: String,
    pub running: String,
    /// Blank means the scheduler has no "unavailable" signature.
    pub unknown: String,
    pub exec_host: String,
    /// Blank means "first capture group". Otherwise expanded against the
    /// match with `$1` / `${name}` references.
    pub exec_host_template: String,
}

impl Default for StatePatterns {
    fn default() -> Self {
        Self {
            pending: SLURM_PENDING_PATTERN.to_string(),
            running: SLURM_RUNNING_PATTERN.to_string(),
            unknown: SLURM_UNKNOWN_PATTERN.to_string(),
            exec_host: SLURM_EXEC_HOST_PATTERN.to_string(),
            exec_host_template: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct StateRule {
    name: &'static str,
    matcher: Regex,
    target: JobState,
}

/// Maps raw scheduler state text onto [`JobState`].
///
/// Rules are evaluated pending, then running, then unknown; the first match
/// wins and no match means [`JobState::Gone`]. Built once and shared
/// read-only between jobs.
#[derive(Debug, Clone)]
pub struct JobStateClassifier {
    rules: Vec<StateRule>,
    exec_host: Regex,
    exec_host_template: Option<String>,
}

impl JobStateClassifier {
    pub fn new(patterns: &StatePatterns) -> AppResult<Self> {
        let mut rules = vec![
            StateRule {
                name: "pending",
                matcher: compile("pending", &patterns.pending)?,
                target: JobState::Pending,
            },
            StateRule {
                name: "running",
                matcher: compile("running", &patterns.running)?,
                target: JobState::Running,
            },
        ];
        if !patterns.unknown.trim().is_empty() {
            rules.push(StateRule {
                name: "unknown",
                matcher: compile("unknown", &patterns.unknown)?,
                target: JobState::Unknown,
            });
        }
        let exec_host = compile("exec_host", &patterns.exec_host)?;
        let exec_host_template = Some(patterns.exec_host_template.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(Self {
            rules,
            exec_host,
            exec_host_template,
        })
    }

    pub fn classify(&self, state_text: &str) -> JobState {
        if state_text.is_empty() {
            return JobState::Gone;
        }
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(state_text))
            .map(|rule| {
                tracing::trace!(rule = rule.name, state_text, "state rule matched");
                rule.target
            })
            .unwrap_or(JobState::Gone)
    }

    /// Execution host from state text, or an empty string while the
    /// scheduler has not placed the job yet.
    pub fn extract_host(&self, state_text: &str) -> String {
        let Some(caps) = self.exec_host.captures(state_text) else {
            return String::new();
        };
        match &self.exec_host_template {
            Some(template) => {
                let mut host = String::new();
                caps.expand(template, &mut host);
                host
            }
            None => caps
                .get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

fn compile(name: &str, pattern: &str) -> AppResult<Regex> {
    if pattern.trim().is_empty() {
        return Err(AppError::Config(format!("state pattern '{name}' must be set")));
    }
    Regex::new(pattern)
        .map_err(|err| AppError::Config(format!("invalid state pattern '{name}': {err}")))
}
