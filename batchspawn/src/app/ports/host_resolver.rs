// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::Job;

/// Site-specific lookup of the host a running job's server is reachable on.
///
/// Replaces `exec_host_pattern`/`exec_host_template` extraction when the
/// scheduler's state text does not carry a usable host name.
#[async_trait]
pub trait HostResolverPort: Send + Sync {
    /// Empty when the host is not known yet.
    async fn resolve_host(&self, system: &str, job: &Job) -> AppResult<String>;
}
