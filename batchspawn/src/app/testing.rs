// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Scripted port implementations shared by unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::macros::datetime;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    ClockPort, CredentialSourcePort, RemoteJobGatewayPort, TelemetryEvent, TelemetryPort,
    TokenEndpointPort, TokenGrant, TokenResponse,
};
use crate::app::types::Credential;

pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(datetime!(2026-03-01 12:00 UTC)),
        }
    }

    pub fn advance(&self, by: time::Duration) {
        *self.now.lock().expect("clock lock") += by;
    }
}

impl ClockPort for ManualClock {
    fn now_utc(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock lock")
    }
}

/// Wall clock driven by tokio's (possibly paused) timer, so token expiry
/// moves together with poll delays.
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl ClockPort for TokioClock {
    fn now_utc(&self) -> OffsetDateTime {
        datetime!(2026-03-01 12:00 UTC) + self.origin.elapsed()
    }
}

/// Token endpoint answering from a queue and recording the refresh tokens it was shown.
pub struct ScriptedTokenEndpoint {
    responses: Mutex<VecDeque<AppResult<TokenResponse>>>,
    presented: Mutex<Vec<Option<String>>>,
    delay: Duration,
}

impl ScriptedTokenEndpoint {
    pub fn new(responses: Vec<AppResult<TokenResponse>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            presented: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every answer arrives `delay` after the request; the presented token
    /// is consumed when the request is sent.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Refresh tokens presented so far; `None` for client-credentials grants.
    pub fn presented(&self) -> Vec<Option<String>> {
        self.presented.lock().expect("presented lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.presented.lock().expect("presented lock").len()
    }
}

pub fn token(access: &str, refresh: Option<&str>, expires_in: u64) -> AppResult<TokenResponse> {
    Ok(TokenResponse {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_in,
    })
}

#[async_trait]
impl TokenEndpointPort for ScriptedTokenEndpoint {
    async fn exchange(&self, grant: TokenGrant<'_>) -> AppResult<TokenResponse> {
        let presented = match grant {
            TokenGrant::RefreshToken { refresh_token, .. } => Some(refresh_token.to_string()),
            TokenGrant::ClientCredentials { .. } => None,
        };
        self.presented
            .lock()
            .expect("presented lock")
            .push(presented);
        let response = self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .expect("unexpected token exchange");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        response
    }
}

/// Credential source that always succeeds with a fixed token.
pub struct StaticCredentials {
    pub access_token: &'static str,
    probe_result: Mutex<AppResult<()>>,
}

impl StaticCredentials {
    pub fn new(access_token: &'static str) -> Self {
        Self {
            access_token,
            probe_result: Mutex::new(Ok(())),
        }
    }

    pub fn rejecting_probe() -> Self {
        Self {
            access_token: "USER_TOKEN",
            probe_result: Mutex::new(Err(AppError::Auth {
                status: 400,
                body: "invalid_grant".into(),
            })),
        }
    }
}

#[async_trait]
impl CredentialSourcePort for StaticCredentials {
    async fn valid_credential(&self) -> AppResult<Credential> {
        Ok(Credential {
            access_token: self.access_token.to_string(),
            refresh_token: "REFRESH".to_string(),
            expires_at: OffsetDateTime::now_utc() + time::Duration::hours(1),
        })
    }

    async fn probe(&self) -> AppResult<()> {
        self.probe_result.lock().expect("probe lock").clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Submit { token: String, system: String },
    Poll { token: String, job_id: String },
    Cancel { token: String, job_id: String },
    ResolveAccount { token: String, system: String },
}

/// Gateway answering each operation from its own queue. Polls past the end
/// of the script repeat the last answer.
#[derive(Default)]
pub struct ScriptedGateway {
    submits: Mutex<VecDeque<AppResult<String>>>,
    polls: Mutex<VecDeque<AppResult<Option<String>>>>,
    last_poll: Mutex<Option<AppResult<Option<String>>>>,
    cancels: Mutex<VecDeque<AppResult<()>>>,
    account: Mutex<Option<AppResult<String>>>,
    calls: Mutex<Vec<GatewayCall>>,
    scripts: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    submit_delay: Duration,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            account: Mutex::new(Some(Ok("group1".to_string()))),
            ..Self::default()
        }
    }

    pub fn with_submits(self, submits: Vec<AppResult<String>>) -> Self {
        *self.submits.lock().expect("submits lock") = VecDeque::from(submits);
        self
    }

    pub fn with_polls(self, polls: Vec<AppResult<Option<String>>>) -> Self {
        *self.polls.lock().expect("polls lock") = VecDeque::from(polls);
        self
    }

    pub fn with_cancels(self, cancels: Vec<AppResult<()>>) -> Self {
        *self.cancels.lock().expect("cancels lock") = VecDeque::from(cancels);
        self
    }

    /// Submissions answer only after `delay`, like a slow scheduler.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn with_account(self, account: AppResult<String>) -> Self {
        *self.account.lock().expect("account lock") = Some(account);
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn poll_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Poll { .. }))
            .count()
    }

    pub fn submit_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Submit { .. }))
            .count()
    }

    pub fn cancel_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Cancel { .. }))
            .count()
    }

    pub fn submitted(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.scripts.lock().expect("scripts lock").clone()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl RemoteJobGatewayPort for ScriptedGateway {
    async fn submit(
        &self,
        credential: &Credential,
        system: &str,
        script: &str,
        env: &BTreeMap<String, String>,
    ) -> AppResult<String> {
        self.record(GatewayCall::Submit {
            token: credential.access_token.clone(),
            system: system.to_string(),
        });
        self.scripts
            .lock()
            .expect("scripts lock")
            .push((script.to_string(), env.clone()));
        let submitted = self
            .submits
            .lock()
            .expect("submits lock")
            .pop_front()
            .expect("unexpected submit");
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        submitted
    }

    async fn poll(
        &self,
        credential: &Credential,
        _system: &str,
        job_id: &str,
    ) -> AppResult<Option<String>> {
        self.record(GatewayCall::Poll {
            token: credential.access_token.clone(),
            job_id: job_id.to_string(),
        });
        let next = self.polls.lock().expect("polls lock").pop_front();
        let mut last = self.last_poll.lock().expect("last poll lock");
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last.clone().expect("unexpected poll"),
        }
    }

    async fn cancel(&self, credential: &Credential, _system: &str, job_id: &str) -> AppResult<()> {
        self.record(GatewayCall::Cancel {
            token: credential.access_token.clone(),
            job_id: job_id.to_string(),
        });
        self.cancels
            .lock()
            .expect("cancels lock")
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn resolve_account(&self, credential: &Credential, system: &str) -> AppResult<String> {
        self.record(GatewayCall::ResolveAccount {
            token: credential.access_token.clone(),
            system: system.to_string(),
        });
        self.account
            .lock()
            .expect("account lock")
            .clone()
            .expect("account result should be present")
    }
}

/// Telemetry sink that keeps event names in order.
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().expect("events lock").clone()
    }
}

impl TelemetryPort for RecordingTelemetry {
    fn event(&self, name: &'static str, _fields: TelemetryEvent) {
        self.events.lock().expect("events lock").push(name);
    }
}
