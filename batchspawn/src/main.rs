// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use batchspawn::adapters::cli::{self, Command};
use batchspawn::adapters::host_command::CommandHostResolver;
use batchspawn::adapters::http::{OAuthTokenEndpoint, RestGateway};
use batchspawn::adapters::telemetry::TracingTelemetry;
use batchspawn::adapters::time::SystemClock;
use batchspawn::app::cancel::CancelSignal;
use batchspawn::app::controller::{CredentialSources, JobController};
use batchspawn::app::ports::CredentialSourcePort;
use batchspawn::app::services::classifier::JobStateClassifier;
use batchspawn::app::services::templates::TemplateRenderer;
use batchspawn::app::token_broker::TokenBroker;
use batchspawn::app::types::{LaunchRequest, PersistedState, PollStatus};
use batchspawn::config::{self, Config, ConfigSource};
use batchspawn::logging;

/// Everything kept between invocations: the tracked job and the refresh
/// token the next exchange must present.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(flatten)]
    job: PersistedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

fn log_config_report(report: &config::ConfigReport, config: &Config) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config state_file: {} (source={})",
        report.state_file.value.display(),
        report.state_file.source.as_str()
    );
    tracing::info!(
        "config start_timeout_secs: {} (source={})",
        report.start_timeout_secs.value,
        report.start_timeout_secs.source.as_str()
    );
    tracing::info!(
        "config port: {} (source={})",
        report.port.value,
        report.port.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
    tracing::debug!(
        system = %config.controller.request.host,
        gateway = %config.gateway.base_url,
        service_account_polling = config.service_account.is_some(),
        poll_interval_secs = config.poll_interval.as_secs(),
        "controller settings loaded"
    );
}

fn read_state(path: &Path) -> Result<StateFile> {
    if !path.exists() {
        return Ok(StateFile::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse state file {}", path.display()))
}

fn write_state(path: &Path, state: &StateFile) -> Result<()> {
    config::ensure_state_dir(path)?;
    let contents = serde_json::to_vec_pretty(state).context("failed to encode state")?;
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    // The file carries a live refresh token.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open state file {}", path.display()))?;
    file.write_all(&contents)
        .with_context(|| format!("failed to write state file {}", path.display()))
}

fn launch_request(
    config: &Config,
    env: Vec<(String, String)>,
    user_options: Vec<(String, String)>,
) -> LaunchRequest {
    let cmd = if config.cmd.is_empty() {
        vec![
            "jupyterhub-singleuser".to_string(),
            format!("--port={}", config.controller.port),
        ]
    } else {
        config.cmd.clone()
    };
    LaunchRequest {
        cmd,
        env: env.into_iter().collect(),
        user_options: user_options.into_iter().collect(),
    }
}

/// Cancels the start once the timeout elapses or on Ctrl-C.
fn spawn_start_watchdog(timeout: Duration) -> (CancelSignal, tokio::task::JoinHandle<()>) {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let interrupted = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                tracing::error!("server job did not start within {} seconds", timeout.as_secs());
            }
            _ = interrupted => {
                tracing::warn!("interrupted; abandoning start");
            }
        }
        let _ = cancel_tx.send(true);
    });
    (CancelSignal::new(cancel_rx), handle)
}

async fn run(controller: &mut JobController, config: &Config, command: Command) -> Result<ExitCode> {
    match command {
        Command::Start {
            timeout_secs,
            env,
            user_options,
        } => {
            let launch = launch_request(config, env, user_options);
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(config.start_timeout);

            let mut progress = controller.progress();
            let reporter = tokio::spawn(async move {
                while let Some(update) = progress.next().await {
                    tracing::info!(state = %update.state, "{}", update.message);
                }
            });
            let (cancel, watchdog) = spawn_start_watchdog(timeout);
            let started = controller.start(&launch, cancel).await;
            watchdog.abort();
            reporter.abort();

            let (host, port) = started.context("failed to start server job")?;
            println!("{host}:{port}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Poll => match controller.poll().await? {
            PollStatus::Alive => {
                println!("alive");
                Ok(ExitCode::SUCCESS)
            }
            PollStatus::Terminated => {
                println!("terminated");
                Ok(ExitCode::from(1))
            }
        },
        Command::Stop { now } => {
            controller
                .stop(now, CancelSignal::never())
                .await
                .context("failed to stop server job")?;
            controller.clear();
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckToken => {
            if controller.check_token_validity().await {
                println!("valid");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("invalid");
                Ok(ExitCode::from(2))
            }
        }
        Command::State => {
            println!("{}", serde_json::to_string_pretty(&controller.save())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let parsed = cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            state_file: opts.state_file,
            refresh_token: opts.refresh_token,
            port: opts.port,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report, &config);

    let mut saved = read_state(&config.state_file)?;

    // A token given on the command line replaces the rotated one on disk.
    let refresh_token = match report.refresh_token {
        Some(ConfigSource::Override) => config.auth.refresh_token.clone(),
        _ => saved
            .refresh_token
            .clone()
            .or_else(|| config.auth.refresh_token.clone()),
    };
    let refresh_token = match (refresh_token, &opts.command) {
        (Some(token), _) => token,
        // Printing the state needs no remote call.
        (None, Command::State) => String::new(),
        (None, _) => {
            anyhow::bail!("no refresh token; pass --refresh-token or set auth.refresh_token")
        }
    };

    let clock = Arc::new(SystemClock::new());
    let user = Arc::new(TokenBroker::for_refresh_token(
        Arc::new(OAuthTokenEndpoint::new(
            config.auth.token_url.clone(),
            config.gateway.timeout,
        )?),
        clock.clone(),
        config.auth.client.clone(),
        refresh_token,
        config.auth.safety_margin,
    ));
    let credentials = match &config.service_account {
        Some(service_account) => {
            let polling: Arc<dyn CredentialSourcePort> =
                Arc::new(TokenBroker::for_client_credentials(
                    Arc::new(OAuthTokenEndpoint::new(
                        service_account.token_url.clone(),
                        config.gateway.timeout,
                    )?),
                    clock,
                    service_account.client.clone(),
                    config.auth.safety_margin,
                ));
            CredentialSources::with_polling(user.clone(), polling)
        }
        None => CredentialSources::user_only(user.clone()),
    };

    let mut controller = JobController::new(
        Arc::new(RestGateway::new(
            config.gateway.base_url.clone(),
            config.gateway.timeout,
        )?),
        credentials,
        Arc::new(JobStateClassifier::new(&config.patterns)?),
        Arc::new(TemplateRenderer::new()),
        Arc::new(TracingTelemetry::new()),
        config.controller.clone(),
    );
    if !config.exec_host_command.is_empty() {
        controller = controller.with_host_resolver(Arc::new(CommandHostResolver::new(
            config.exec_host_command.clone(),
            config.gateway.timeout,
        )?));
    }
    controller.load(saved.job.clone());

    let outcome = run(&mut controller, &config, opts.command).await;

    saved.job = controller.save();
    saved.refresh_token = Some(user.refresh_token().await).filter(|token| !token.is_empty());
    write_state(&config.state_file, &saved)?;
    outcome
}
