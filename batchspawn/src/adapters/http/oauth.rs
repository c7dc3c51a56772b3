// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapters::http::{build_client, transport_error};
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{TokenEndpointPort, TokenGrant, TokenResponse};

#[derive(Deserialize)]
struct TokenBody {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

/// OAuth2 token endpoint speaking the form-encoded `refresh_token` and
/// `client_credentials` grants.
pub struct OAuthTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
}

impl OAuthTokenEndpoint {
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            token_url: token_url.into(),
        })
    }
}

#[async_trait]
impl TokenEndpointPort for OAuthTokenEndpoint {
    async fn exchange(&self, grant: TokenGrant<'_>) -> AppResult<TokenResponse> {
        let form: Vec<(&str, &str)> = match grant {
            TokenGrant::RefreshToken {
                client,
                refresh_token,
            } => vec![
                ("grant_type", "refresh_token"),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ],
            TokenGrant::ClientCredentials { client } => vec![
                ("grant_type", "client_credentials"),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ],
        };

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| transport_error("token request failed", err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenBody = response
            .json()
            .await
            .map_err(|err| transport_error("malformed token response", err))?;
        Ok(TokenResponse {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_in: body.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::ClientSecret;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> ClientSecret {
        ClientSecret {
            client_id: "hub".into(),
            client_secret: "s3cret".into(),
        }
    }

    async fn endpoint(server: &MockServer) -> OAuthTokenEndpoint {
        OAuthTokenEndpoint::new(format!("{}/token", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn refresh_grant_returns_rotated_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=REFRESH_0"))
            .and(body_string_contains("client_id=hub"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ACCESS_1",
                "refresh_token": "REFRESH_1",
                "expires_in": 300,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client();
        let response = endpoint(&server)
            .await
            .exchange(TokenGrant::RefreshToken {
                client: &client,
                refresh_token: "REFRESH_0",
            })
            .await
            .unwrap();

        assert_eq!(
            response,
            TokenResponse {
                access_token: "ACCESS_1".into(),
                refresh_token: Some("REFRESH_1".into()),
                expires_in: 300,
            }
        );
    }

    #[tokio::test]
    async fn client_credentials_grant_has_no_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "SA_TOKEN",
                "expires_in": 60
            })))
            .mount(&server)
            .await;

        let client = client();
        let response = endpoint(&server)
            .await
            .exchange(TokenGrant::ClientCredentials { client: &client })
            .await
            .unwrap();
        assert_eq!(response.access_token, "SA_TOKEN");
        assert_eq!(response.refresh_token, None);
    }

    #[tokio::test]
    async fn rejected_grant_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let client = client();
        let err = endpoint(&server)
            .await
            .exchange(TokenGrant::RefreshToken {
                client: &client,
                refresh_token: "USED",
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AppError::Auth {
                status: 400,
                body: "invalid_grant".into(),
            }
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let endpoint =
            OAuthTokenEndpoint::new("http://127.0.0.1:9/token", Duration::from_secs(2)).unwrap();
        let client = client();
        let err = endpoint
            .exchange(TokenGrant::ClientCredentials { client: &client })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Transport { .. }));
    }
}
