// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use crate::app::errors::{AppError, AppResult};

pub mod oauth;
pub mod rest;

pub use oauth::OAuthTokenEndpoint;
pub use rest::RestGateway;

pub(crate) fn build_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("batchspawn/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))
}

/// Request-level failure: nothing usable came back from the server.
pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::timeout(format!("{context}: {err}"))
    } else {
        AppError::transport(format!("{context}: {err}"))
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
