// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// One OAuth2 token request.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant<'a> {
    RefreshToken {
        client: &'a ClientSecret,
        refresh_token: &'a str,
    },
    ClientCredentials {
        client: &'a ClientSecret,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    /// Present when the server rotates refresh tokens.
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// OAuth2 token endpoint boundary.
/// Rejections map to `AppError::Auth`, network failures to `AppError::Transport`.
#[async_trait]
pub trait TokenEndpointPort: Send + Sync {
    async fn exchange(&self, grant: TokenGrant<'_>) -> AppResult<TokenResponse>;
}
