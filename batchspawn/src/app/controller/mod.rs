// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use tokio::sync::watch;

use crate::app::cancel::CancelSignal;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    CredentialSourcePort, HostResolverPort, RemoteJobGatewayPort, ScriptRendererPort,
    TelemetryEvent, TelemetryPort,
};
use crate::app::services::classifier::JobStateClassifier;
use crate::app::services::subvars::{JobRequest, SubstitutionVariables, prepare_job_env};
use crate::app::types::{
    Job, JobState, LaunchRequest, PersistedState, Phase, PollStatus, ProgressMessage,
};

mod progress;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Port the single-user server listens on inside the job.
    pub port: u16,
    pub batch_script: String,
    pub request: JobRequest,
    pub startup_poll_interval: Duration,
    /// Delay between polls while a fresh submission is not visible yet.
    pub visibility_retry_interval: Duration,
    /// Bound on "not visible" answers during a steady-state poll.
    pub steady_visibility_attempts: u32,
    pub stop_confirm_attempts: u32,
    pub stop_confirm_interval: Duration,
    pub progress_interval: Duration,
    pub base64_env_keys: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            port: 8888,
            batch_script: String::new(),
            request: JobRequest::default(),
            startup_poll_interval: Duration::from_millis(500),
            visibility_retry_interval: Duration::from_secs(1),
            steady_visibility_attempts: 5,
            stop_confirm_attempts: 10,
            stop_confirm_interval: Duration::from_secs(1),
            progress_interval: Duration::from_secs(1),
            base64_env_keys: Vec::new(),
        }
    }
}

/// Which credential each remote call runs under.
///
/// Submissions and cancellations always act as the user. Polls may use a
/// separate source, typically a service account, so that status checks keep
/// working while the user's session is being refreshed.
#[derive(Clone)]
pub struct CredentialSources {
    pub user: Arc<dyn CredentialSourcePort>,
    pub polling: Option<Arc<dyn CredentialSourcePort>>,
}

impl CredentialSources {
    pub fn user_only(user: Arc<dyn CredentialSourcePort>) -> Self {
        Self {
            user,
            polling: None,
        }
    }

    pub fn with_polling(
        user: Arc<dyn CredentialSourcePort>,
        polling: Arc<dyn CredentialSourcePort>,
    ) -> Self {
        Self {
            user,
            polling: Some(polling),
        }
    }

    fn for_polling(&self) -> &Arc<dyn CredentialSourcePort> {
        self.polling.as_ref().unwrap_or(&self.user)
    }
}

/// Drives one batch job from submission to termination for one session.
///
/// Operations are sequential (`&mut self`); the session manager guarantees a
/// single controller per job. Every remote call and every delay is a
/// suspension point raced against the caller's [`CancelSignal`].
pub struct JobController {
    gateway: Arc<dyn RemoteJobGatewayPort>,
    credentials: CredentialSources,
    classifier: Arc<JobStateClassifier>,
    renderer: Arc<dyn ScriptRendererPort>,
    telemetry: Arc<dyn TelemetryPort>,
    host_resolver: Option<Arc<dyn HostResolverPort>>,
    settings: ControllerSettings,
    system: String,
    job: Job,
    phase: Phase,
    access_token_is_valid: bool,
    snapshot: watch::Sender<Job>,
}

impl JobController {
    pub fn new(
        gateway: Arc<dyn RemoteJobGatewayPort>,
        credentials: CredentialSources,
        classifier: Arc<JobStateClassifier>,
        renderer: Arc<dyn ScriptRendererPort>,
        telemetry: Arc<dyn TelemetryPort>,
        settings: ControllerSettings,
    ) -> Self {
        let system = settings.request.host.trim().to_string();
        let (snapshot, _) = watch::channel(Job::default());
        Self {
            gateway,
            credentials,
            classifier,
            renderer,
            telemetry,
            host_resolver: None,
            settings,
            system,
            job: Job::default(),
            phase: Phase::NotSubmitted,
            access_token_is_valid: false,
            snapshot,
        }
    }

    /// Look up execution hosts through `resolver` instead of the classifier's
    /// host pattern.
    pub fn with_host_resolver(mut self, resolver: Arc<dyn HostResolverPort>) -> Self {
        self.host_resolver = Some(resolver);
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn port(&self) -> u16 {
        self.settings.port
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// Result of the last [`check_token_validity`](Self::check_token_validity).
    pub fn access_token_is_valid(&self) -> bool {
        self.access_token_is_valid
    }

    /// Submit the batch job and wait until it runs.
    ///
    /// Returns the execution host and the configured port. On any error the
    /// job is either still tracked (so `stop` can reach it) or fully cleared;
    /// on cancellation the remote job is canceled and state cleared.
    pub async fn start(
        &mut self,
        launch: &LaunchRequest,
        mut cancel: CancelSignal,
    ) -> AppResult<(String, u16)> {
        if self.job.has_id() {
            tracing::warn!(
                job_id = %self.job.job_id,
                "starting a new job while another one is tracked; the old job is no longer followed"
            );
        }
        self.clear();
        self.set_phase(Phase::Submitting);

        let job_id = match self.submit_batch_script(launch, &mut cancel).await {
            Ok(job_id) => job_id,
            Err(err) => {
                self.emit("job.submit.failed", Some(err.to_string()));
                self.clear();
                return Err(err);
            }
        };
        self.job.job_id = job_id;
        self.job.state = JobState::Pending;
        self.set_phase(Phase::Pending);
        self.emit("job.submitted", None);

        match self.wait_until_running(&mut cancel).await {
            Ok(host) => {
                tracing::info!(
                    job_id = %self.job.job_id,
                    "server job started on {host}:{}",
                    self.settings.port
                );
                Ok((host, self.settings.port))
            }
            Err(AppError::Cancelled) => {
                self.abandon().await;
                Err(AppError::Cancelled)
            }
            Err(err) => Err(err),
        }
    }

    /// Single steady-state check. Only a job classified as gone clears state;
    /// failed or empty answers report the job as still alive.
    pub async fn poll(&mut self) -> AppResult<PollStatus> {
        if !self.job.has_id() {
            self.clear();
            return Ok(PollStatus::Terminated);
        }

        let mut cancel = CancelSignal::never();
        let attempts = self.settings.steady_visibility_attempts.max(1);
        let state_text = match self.wait_for_visibility(&mut cancel, Some(attempts)).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::warn!(
                    job_id = %self.job.job_id,
                    "no status for job after {attempts} attempts; assuming it is still alive"
                );
                return Ok(PollStatus::Alive);
            }
            Err(err) if err.is_fatal_auth() => return Err(err),
            Err(err) => {
                tracing::warn!(job_id = %self.job.job_id, "job poll failed: {err}");
                return Ok(PollStatus::Alive);
            }
        };

        let state = self.record_state(&state_text);
        if state.is_alive() {
            return Ok(PollStatus::Alive);
        }
        tracing::info!(job_id = %self.job.job_id, state_text = %state_text, "job terminated");
        self.emit("job.terminated", None);
        self.clear();
        Ok(PollStatus::Terminated)
    }

    /// Cancel the job. Unless `immediate`, wait a bounded number of polls for
    /// the scheduler to confirm; an unconfirmed stop is only logged.
    pub async fn stop(&mut self, immediate: bool, mut cancel: CancelSignal) -> AppResult<()> {
        if !self.job.has_id() {
            tracing::debug!("no job to stop");
            return Ok(());
        }
        let job_id = self.job.job_id.clone();
        tracing::info!(job_id = %job_id, "stopping server job");
        self.set_phase(Phase::Stopping);

        let credential = cancel.race(self.credentials.user.valid_credential()).await??;
        match cancel
            .race(self.gateway.cancel(&credential, &self.system, &job_id))
            .await?
        {
            Ok(()) => self.emit("job.cancel.requested", None),
            Err(err @ AppError::Remote { .. }) => {
                tracing::warn!(job_id = %job_id, "cancel rejected: {err}");
                self.clear();
                return Err(err);
            }
            Err(err) => return Err(err),
        }
        if immediate {
            return Ok(());
        }

        let attempts = self.settings.stop_confirm_attempts.max(1);
        for attempt in 1..=attempts {
            let state = match self.poll_gateway(&mut cancel).await {
                Ok(Some(text)) => self.record_state(&text),
                Ok(None) => JobState::Unknown,
                Err(err) if err.is_fatal_auth() || err == AppError::Cancelled => return Err(err),
                Err(err) => {
                    tracing::debug!(job_id = %job_id, attempt, "stop confirmation poll failed: {err}");
                    JobState::Unknown
                }
            };
            if !matches!(state, JobState::Running | JobState::Unknown) {
                tracing::info!(job_id = %job_id, state = %state, "server job stopped");
                self.set_phase(Phase::Gone);
                return Ok(());
            }
            if attempt < attempts {
                cancel.sleep(self.settings.stop_confirm_interval).await?;
            }
        }

        tracing::warn!(
            job_id = %job_id,
            "server job at {}:{} possibly failed to terminate",
            self.job.exec_host,
            self.settings.port
        );
        self.emit("job.stop.unconfirmed", None);
        Ok(())
    }

    /// Status messages until the job is seen running. Inspects the
    /// controller's published state; it never calls the gateway itself.
    pub fn progress(&self) -> BoxStream<'static, ProgressMessage> {
        progress::progress_stream(self.snapshot.subscribe(), self.settings.progress_interval)
    }

    /// Ask the user's credential source for a fresh exchange and remember
    /// whether it worked. Intended for UI layers deciding whether to offer
    /// actions that need a live session.
    pub async fn check_token_validity(&mut self) -> bool {
        self.access_token_is_valid = match self.credentials.user.probe().await {
            Ok(()) => true,
            Err(err) => {
                tracing::info!(code = err.code(), "user token is no longer valid: {err}");
                false
            }
        };
        self.access_token_is_valid
    }

    pub fn load(&mut self, state: PersistedState) {
        let job_id = state.job_id.unwrap_or_default();
        let state_text = state.job_state_text.unwrap_or_default();
        self.job = Job {
            job_id,
            ..Job::default()
        };
        if !self.job.has_id() {
            self.set_phase(Phase::NotSubmitted);
            return;
        }
        if state_text.is_empty() {
            self.job.state = JobState::Unknown;
            self.set_phase(Phase::Unknown);
        } else {
            self.record_state(&state_text);
        }
    }

    pub fn save(&self) -> PersistedState {
        let non_empty = |value: &str| Some(value.to_string()).filter(|v| !v.is_empty());
        PersistedState {
            job_id: non_empty(&self.job.job_id),
            job_state_text: non_empty(&self.job.state_text),
        }
    }

    pub fn clear(&mut self) {
        self.job = Job::default();
        self.set_phase(Phase::NotSubmitted);
    }

    async fn submit_batch_script(
        &mut self,
        launch: &LaunchRequest,
        cancel: &mut CancelSignal,
    ) -> AppResult<String> {
        let mut vars = SubstitutionVariables::from_request(&self.settings.request);
        vars.insert("cmd", launch.cmd.join(" "));
        vars.extend(
            launch
                .user_options
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        let system = vars.get("host").unwrap_or_default().trim().to_string();
        if system.is_empty() {
            return Err(AppError::Config(
                "job request has no target host".to_string(),
            ));
        }
        self.system = system;

        let credential = cancel.race(self.credentials.user.valid_credential()).await??;
        let account = cancel
            .race(self.gateway.resolve_account(&credential, &self.system))
            .await?
            .map_err(|err| submission_failure("account lookup failed", err))?;
        vars.insert("account", account);

        let script = self.renderer.render(&self.settings.batch_script, &vars)?;
        let env = prepare_job_env(&launch.env, &self.settings.base64_env_keys);
        tracing::info!(system = %self.system, "submitting batch job");
        tracing::debug!("batch script:\n{script}");

        let credential = cancel.race(self.credentials.user.valid_credential()).await??;
        let submitted = match cancel
            .race(self.gateway.submit(&credential, &self.system, &script, &env))
            .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    system = %self.system,
                    "submission interrupted; a job may exist on the scheduler without a tracked id"
                );
                return Err(err);
            }
        };
        match submitted {
            Ok(job_id) if !job_id.trim().is_empty() => {
                let job_id = job_id.trim().to_string();
                tracing::info!(job_id = %job_id, "job submitted");
                return Ok(job_id);
            }
            Ok(_) => {
                tracing::error!(system = %self.system, "gateway accepted the job but returned no id");
            }
            // The script may have been accepted before the answer was lost.
            // Submitting again would start a second allocation.
            Err(err) if err.is_timeout() => {
                tracing::error!(
                    system = %self.system,
                    "job submission timed out; a job may exist on the scheduler without a tracked id: {err}"
                );
            }
            Err(err) => return Err(submission_failure("submit failed", err)),
        }
        Err(AppError::submission("no job id"))
    }

    /// Poll until the job runs. Pending and unknown states keep waiting; the
    /// caller bounds the whole wait through `cancel`.
    async fn wait_until_running(&mut self, cancel: &mut CancelSignal) -> AppResult<String> {
        loop {
            let Some(state_text) = self.wait_for_visibility(cancel, None).await? else {
                continue;
            };
            let state = self.record_state(&state_text);
            if state == JobState::Running {
                self.resolve_host(cancel).await?;
            }
            match state {
                JobState::Running if !self.job.exec_host.is_empty() => {
                    self.emit("job.running", None);
                    return Ok(self.job.exec_host.clone());
                }
                JobState::Running => {
                    tracing::debug!(
                        job_id = %self.job.job_id,
                        state_text = %state_text,
                        "job running but no host known yet; check exec_host_pattern"
                    );
                }
                JobState::Pending => {
                    tracing::debug!(job_id = %self.job.job_id, "job still pending");
                }
                JobState::Unknown => {
                    tracing::debug!(job_id = %self.job.job_id, "job still unknown");
                }
                JobState::Gone | JobState::NotSubmitted => {
                    tracing::warn!(
                        job_id = %self.job.job_id,
                        state_text = %state_text,
                        "job neither pending nor running"
                    );
                    let err = AppError::JobLost {
                        job_id: self.job.job_id.clone(),
                        state_text,
                    };
                    self.emit("job.lost", None);
                    self.clear();
                    return Err(err);
                }
            }
            cancel.sleep(self.settings.startup_poll_interval).await?;
        }
    }

    /// Poll until the gateway reports something, retrying "not visible yet"
    /// and transient failures after a short delay. `None` bounds the retries
    /// only through `cancel`.
    async fn wait_for_visibility(
        &self,
        cancel: &mut CancelSignal,
        max_attempts: Option<u32>,
    ) -> AppResult<Option<String>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.poll_gateway(cancel).await {
                Ok(Some(text)) => return Ok(Some(text)),
                Ok(None) => {
                    tracing::debug!(job_id = %self.job.job_id, attempt, "job not visible yet");
                }
                Err(err) if err.is_fatal_auth() || err == AppError::Cancelled => return Err(err),
                Err(err) => {
                    tracing::warn!(job_id = %self.job.job_id, attempt, "job status query failed: {err}");
                }
            }
            if max_attempts.is_some_and(|max| attempt >= max) {
                return Ok(None);
            }
            cancel.sleep(self.settings.visibility_retry_interval).await?;
        }
    }

    async fn poll_gateway(&self, cancel: &mut CancelSignal) -> AppResult<Option<String>> {
        let credential = cancel
            .race(self.credentials.for_polling().valid_credential())
            .await??;
        let text = cancel
            .race(self.gateway.poll(&credential, &self.system, &self.job.job_id))
            .await??;
        Ok(text.filter(|t| !t.trim().is_empty()))
    }

    /// Classify and store a fresh state text.
    fn record_state(&mut self, state_text: &str) -> JobState {
        let state = self.classifier.classify(state_text);
        self.job.state_text = state_text.to_string();
        match state {
            JobState::Running if self.host_resolver.is_none() => {
                let host = self.classifier.extract_host(state_text);
                if !host.is_empty() {
                    self.job.exec_host = host;
                }
            }
            JobState::Pending => self.job.exec_host.clear(),
            _ => {}
        }
        self.apply_state(state);
        state
    }

    /// Ask the configured resolver for the execution host of a running job.
    async fn resolve_host(&mut self, cancel: &mut CancelSignal) -> AppResult<()> {
        let Some(resolver) = self.host_resolver.clone() else {
            return Ok(());
        };
        match cancel
            .race(resolver.resolve_host(&self.system, &self.job))
            .await?
        {
            Ok(host) if !host.trim().is_empty() => {
                self.job.exec_host = host.trim().to_string();
                self.apply_state(JobState::Running);
            }
            Ok(_) => tracing::debug!(job_id = %self.job.job_id, "host resolver has no host yet"),
            Err(err) if err.is_fatal_auth() => return Err(err),
            Err(err) => tracing::warn!(job_id = %self.job.job_id, "host lookup failed: {err}"),
        }
        Ok(())
    }

    /// Publish `state`. A running job is shown as unknown until its host is
    /// known, since nothing can connect to it before that.
    fn apply_state(&mut self, state: JobState) {
        let shown = match state {
            JobState::Running if self.job.exec_host.is_empty() => JobState::Unknown,
            other => other,
        };
        self.job.state = shown;
        let phase = match shown {
            JobState::NotSubmitted => Phase::NotSubmitted,
            JobState::Pending => Phase::Pending,
            JobState::Running => Phase::Running,
            JobState::Unknown => Phase::Unknown,
            JobState::Gone => Phase::Gone,
        };
        // A stop in progress stays visible as such until it is confirmed.
        if self.phase == Phase::Stopping && phase != Phase::Gone {
            self.publish();
        } else {
            self.set_phase(phase);
        }
    }

    /// Best-effort cleanup after the start was canceled with a job id known.
    async fn abandon(&mut self) {
        let job_id = self.job.job_id.clone();
        tracing::warn!(job_id = %job_id, "start canceled; canceling submitted job");
        let result = async {
            let credential = self.credentials.user.valid_credential().await?;
            self.gateway.cancel(&credential, &self.system, &job_id).await
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(
                job_id = %job_id,
                "could not cancel job {job_id} after an interrupted start; it may still be queued: {err}"
            );
        }
        self.emit("job.cancel.requested", None);
        self.clear();
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.job.clone());
    }

    fn emit(&self, name: &'static str, detail: Option<String>) {
        self.telemetry.event(
            name,
            TelemetryEvent {
                system: Some(self.system.clone()).filter(|s| !s.is_empty()),
                job_id: Some(self.job.job_id.clone()).filter(|id| !id.is_empty()),
                state: Some(self.job.state.as_str()),
                exec_host: Some(self.job.exec_host.clone()).filter(|h| !h.is_empty()),
                detail,
            },
        );
    }
}

/// Submission-time failures become `Submission` errors, except a rejected
/// credential which stays fatal as-is.
fn submission_failure(context: &str, err: AppError) -> AppError {
    match err {
        err @ (AppError::Auth { .. } | AppError::Cancelled) => err,
        other => AppError::submission(format!("{context}: {other}")),
    }
}
