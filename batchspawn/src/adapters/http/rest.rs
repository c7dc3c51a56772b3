// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::adapters::http::{build_client, join_url, transport_error};
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::RemoteJobGatewayPort;
use crate::app::services::hostlist;
use crate::app::types::Credential;

#[derive(Serialize)]
struct SubmitBody<'a> {
    script: &'a str,
    env: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct SubmitReply {
    #[serde(rename = "jobId", default)]
    job_id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct JobsReply {
    #[serde(default)]
    jobs: Vec<JobRecord>,
}

#[derive(Deserialize)]
struct JobRecord {
    state: String,
    #[serde(default)]
    nodelist: String,
}

#[derive(Deserialize)]
struct UserInfoReply {
    group: Option<GroupRecord>,
}

#[derive(Deserialize)]
struct GroupRecord {
    name: String,
}

/// Scheduler gateway over the REST API:
///
/// * `POST   {base}/compute/{system}/jobs`
/// * `GET    {base}/compute/{system}/jobs/{id}`
/// * `DELETE {base}/compute/{system}/jobs/{id}`
/// * `GET    {base}/status/{system}/userinfo`
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
}

impl RestGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    fn jobs_url(&self, system: &str) -> String {
        join_url(&self.base_url, &format!("compute/{system}/jobs"))
    }

    fn job_url(&self, system: &str, job_id: &str) -> String {
        join_url(&self.base_url, &format!("compute/{system}/jobs/{job_id}"))
    }
}

async fn remote_error(response: reqwest::Response) -> AppError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AppError::Remote { status, body }
}

fn malformed(what: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Remote {
        status: StatusCode::OK.as_u16(),
        body: format!("malformed {what} reply: {err}"),
    }
}

/// `"<STATE> <first host>"`, or just the state while nothing is allocated.
fn state_text(record: &JobRecord) -> AppResult<String> {
    let host = hostlist::first_host(&record.nodelist).map_err(|err| malformed("node list", err))?;
    let state = record.state.trim();
    Ok(if host.is_empty() {
        state.to_string()
    } else {
        format!("{state} {host}")
    })
}

#[async_trait]
impl RemoteJobGatewayPort for RestGateway {
    async fn submit(
        &self,
        credential: &Credential,
        system: &str,
        script: &str,
        env: &BTreeMap<String, String>,
    ) -> AppResult<String> {
        let response = self
            .client
            .post(self.jobs_url(system))
            .bearer_auth(&credential.access_token)
            .json(&SubmitBody { script, env })
            .send()
            .await
            .map_err(|err| transport_error("job submission failed", err))?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        let reply: SubmitReply = response
            .json()
            .await
            .map_err(|err| malformed("submission", err))?;
        // Ids come back as numbers or strings depending on the gateway version.
        Ok(match reply.job_id {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => String::new(),
        })
    }

    async fn poll(
        &self,
        credential: &Credential,
        system: &str,
        job_id: &str,
    ) -> AppResult<Option<String>> {
        let response = self
            .client
            .get(self.job_url(system, job_id))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|err| transport_error("job status query failed", err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        let reply: JobsReply = response
            .json()
            .await
            .map_err(|err| malformed("job status", err))?;
        reply.jobs.first().map(state_text).transpose()
    }

    async fn cancel(&self, credential: &Credential, system: &str, job_id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(self.job_url(system, job_id))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|err| transport_error("job cancel failed", err))?;
        // Already finished jobs are unknown to the scheduler.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(remote_error(response).await)
    }

    async fn resolve_account(&self, credential: &Credential, system: &str) -> AppResult<String> {
        let response = self
            .client
            .get(join_url(&self.base_url, &format!("status/{system}/userinfo")))
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|err| transport_error("user info query failed", err))?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        let reply: UserInfoReply = response
            .json()
            .await
            .map_err(|err| malformed("user info", err))?;
        reply
            .group
            .map(|group| group.name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed("user info", "missing group name"))
    }
}
