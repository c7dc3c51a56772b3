// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::Credential;

/// Remote scheduler reached through the REST gateway.
///
/// Every call is authorized by the credential passed in. Network failures
/// surface as `AppError::Transport`, non-success responses as
/// `AppError::Remote`.
#[async_trait]
pub trait RemoteJobGatewayPort: Send + Sync {
    /// Returns the scheduler job id. An empty id is not an error: the
    /// accounting layer may not have indexed the submission yet.
    async fn submit(
        &self,
        credential: &Credential,
        system: &str,
        script: &str,
        env: &BTreeMap<String, String>,
    ) -> AppResult<String>;

    /// Raw scheduler state text such as `"RUNNING nid02357"`.
    /// `None` means the job is not visible yet, not that it is gone.
    async fn poll(
        &self,
        credential: &Credential,
        system: &str,
        job_id: &str,
    ) -> AppResult<Option<String>>;

    /// Idempotent; canceling a finished job succeeds.
    async fn cancel(&self, credential: &Credential, system: &str, job_id: &str) -> AppResult<()>;

    /// Primary account/group name of the caller on `system`.
    async fn resolve_account(&self, credential: &Credential, system: &str) -> AppResult<String>;
}
