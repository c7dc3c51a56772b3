// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::Credential;

/// Hands out a credential that is valid at the time of the call.
#[async_trait]
pub trait CredentialSourcePort: Send + Sync {
    async fn valid_credential(&self) -> AppResult<Credential>;

    /// Forces an exchange so the caller learns whether the stored grant still works.
    async fn probe(&self) -> AppResult<()>;
}
