// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    ClientSecret, ClockPort, CredentialSourcePort, TokenEndpointPort, TokenGrant, TokenResponse,
};
use crate::app::types::Credential;

pub const DEFAULT_SAFETY_MARGIN: time::Duration = time::Duration::seconds(30);

// Longer lifetimes are clamped; nothing issues year-long access tokens.
const MAX_TOKEN_LIFETIME: time::Duration = time::Duration::days(365);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// User-delegated session: exchanges a (possibly rotating) refresh token.
    RefreshToken,
    /// Service account: exchanges client id and secret only.
    ClientCredentials,
}

/// Owns one credential and keeps it fresh.
///
/// Readers take the cheap path while the stored credential is valid. When it
/// is not, one exchange at a time runs and swaps in the whole new credential,
/// so readers never see a half-updated token pair and a single-use refresh
/// token is never presented twice.
///
/// Exchanges run on a task owned by the broker. A caller that stops waiting
/// (timeout, cancellation) does not abort the exchange, so a refresh token
/// rotated by the server is always stored.
pub struct TokenBroker {
    inner: Arc<BrokerState>,
}

struct BrokerState {
    label: &'static str,
    endpoint: Arc<dyn TokenEndpointPort>,
    clock: Arc<dyn ClockPort>,
    client: ClientSecret,
    kind: GrantKind,
    safety_margin: time::Duration,
    current: RwLock<Credential>,
    refresh_lock: Mutex<()>,
}

impl TokenBroker {
    pub fn for_refresh_token(
        endpoint: Arc<dyn TokenEndpointPort>,
        clock: Arc<dyn ClockPort>,
        client: ClientSecret,
        refresh_token: impl Into<String>,
        safety_margin: time::Duration,
    ) -> Self {
        Self::with_credential(
            "user",
            endpoint,
            clock,
            client,
            GrantKind::RefreshToken,
            Credential::from_refresh_token(refresh_token),
            safety_margin,
        )
    }

    pub fn for_client_credentials(
        endpoint: Arc<dyn TokenEndpointPort>,
        clock: Arc<dyn ClockPort>,
        client: ClientSecret,
        safety_margin: time::Duration,
    ) -> Self {
        Self::with_credential(
            "service-account",
            endpoint,
            clock,
            client,
            GrantKind::ClientCredentials,
            Credential::from_refresh_token(String::new()),
            safety_margin,
        )
    }

    pub fn with_credential(
        label: &'static str,
        endpoint: Arc<dyn TokenEndpointPort>,
        clock: Arc<dyn ClockPort>,
        client: ClientSecret,
        kind: GrantKind,
        credential: Credential,
        safety_margin: time::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(BrokerState {
                label,
                endpoint,
                clock,
                client,
                kind,
                safety_margin: safety_margin.max(time::Duration::ZERO),
                current: RwLock::new(credential),
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    pub fn kind(&self) -> GrantKind {
        self.inner.kind
    }

    /// Returns the stored credential when it is still valid, otherwise
    /// exchanges for a new one. A rejected exchange is returned as-is.
    pub async fn get_valid_credential(&self) -> AppResult<Credential> {
        if let Some(credential) = self.inner.valid_now().await {
            return Ok(credential);
        }
        self.exchange(false).await
    }

    /// Exchange regardless of the stored expiry.
    pub async fn force_refresh(&self) -> AppResult<Credential> {
        self.exchange(true).await
    }

    /// The refresh token the next exchange will present.
    pub async fn refresh_token(&self) -> String {
        self.inner.current.read().await.refresh_token.clone()
    }

    async fn exchange(&self, force: bool) -> AppResult<Credential> {
        let state = Arc::clone(&self.inner);
        let label = state.label;
        let task = tokio::spawn(async move {
            let _guard = state.refresh_lock.lock().await;
            // Someone else may have refreshed while we waited for the lock.
            if !force {
                if let Some(credential) = state.valid_now().await {
                    return Ok(credential);
                }
            }
            state.refresh_locked().await
        });
        task.await.map_err(|err| {
            tracing::error!(broker = label, "token exchange task failed: {err}");
            AppError::transport(format!("token exchange task failed: {err}"))
        })?
    }
}

impl BrokerState {
    async fn valid_now(&self) -> Option<Credential> {
        let current = self.current.read().await;
        current
            .is_valid_at(self.clock.now_utc())
            .then(|| current.clone())
    }

    async fn refresh_locked(&self) -> AppResult<Credential> {
        let previous_refresh = self.current.read().await.refresh_token.clone();
        let grant = match self.kind {
            GrantKind::RefreshToken => TokenGrant::RefreshToken {
                client: &self.client,
                refresh_token: &previous_refresh,
            },
            GrantKind::ClientCredentials => TokenGrant::ClientCredentials {
                client: &self.client,
            },
        };

        let issued_at = self.clock.now_utc();
        tracing::debug!(broker = self.label, "exchanging token");
        let response = self.endpoint.exchange(grant).await.inspect_err(|err| {
            tracing::warn!(broker = self.label, code = err.code(), "token exchange failed: {err}");
        })?;

        let credential = self.credential_from(response, previous_refresh, issued_at);
        *self.current.write().await = credential.clone();
        tracing::debug!(
            broker = self.label,
            expires_at = %credential.expires_at,
            "token refreshed"
        );
        Ok(credential)
    }

    fn credential_from(
        &self,
        response: TokenResponse,
        previous_refresh: String,
        issued_at: time::OffsetDateTime,
    ) -> Credential {
        let lifetime = i64::try_from(response.expires_in)
            .map(time::Duration::seconds)
            .unwrap_or(MAX_TOKEN_LIFETIME)
            .min(MAX_TOKEN_LIFETIME);
        let expires_at = issued_at + (lifetime - self.safety_margin);
        Credential {
            access_token: response.access_token,
            // Rotating servers invalidate the old token with this exchange.
            refresh_token: response
                .refresh_token
                .filter(|token| !token.is_empty())
                .unwrap_or(previous_refresh),
            expires_at,
        }
    }
}

#[async_trait]
impl CredentialSourcePort for TokenBroker {
    async fn valid_credential(&self) -> AppResult<Credential> {
        self.get_valid_credential().await
    }

    async fn probe(&self) -> AppResult<()> {
        self.force_refresh().await.map(|_| ())
    }
}
