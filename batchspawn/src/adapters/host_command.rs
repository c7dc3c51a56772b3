// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::HostResolverPort;
use crate::app::types::Job;

pub const SYSTEM_ENV_VAR: &str = "BATCHSPAWN_SYSTEM";
pub const JOB_ID_ENV_VAR: &str = "BATCHSPAWN_JOB_ID";
pub const JOB_STATE_ENV_VAR: &str = "BATCHSPAWN_JOB_STATE";

/// Runs a site-provided program to find where a running job can be reached.
///
/// The job is passed through `BATCHSPAWN_SYSTEM`, `BATCHSPAWN_JOB_ID` and
/// `BATCHSPAWN_JOB_STATE`. The first non-empty stdout line is the host.
#[derive(Debug, Clone)]
pub struct CommandHostResolver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandHostResolver {
    pub fn new(command: Vec<String>, timeout: Duration) -> AppResult<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|program| !program.trim().is_empty())
            .ok_or_else(|| AppError::Config("exec_host_command must name a program".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }
}

#[async_trait]
impl HostResolverPort for CommandHostResolver {
    async fn resolve_host(&self, system: &str, job: &Job) -> AppResult<String> {
        let run = Command::new(&self.program)
            .args(&self.args)
            .env(SYSTEM_ENV_VAR, system)
            .env(JOB_ID_ENV_VAR, &job.job_id)
            .env(JOB_STATE_ENV_VAR, &job.state_text)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "{} did not finish within {}s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| AppError::transport(format!("failed to run {}: {err}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::transport(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let host = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        tracing::debug!(job_id = %job.job_id, host, "host command answered");
        Ok(host.to_string())
    }
}
