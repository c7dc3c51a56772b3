// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::app::controller::ControllerSettings;
use crate::app::ports::ClientSecret;
use crate::app::services::classifier::{
    JobStateClassifier, SLURM_EXEC_HOST_PATTERN, SLURM_PENDING_PATTERN, SLURM_RUNNING_PATTERN,
    SLURM_UNKNOWN_PATTERN, StatePatterns,
};
use crate::app::services::subvars::JobRequest;
use crate::app::services::templates::SLURM_BATCH_SCRIPT;

const APP_DIR_NAME: &str = "batchspawn";
const CONFIG_FILE_NAME: &str = "batchspawn.toml";
const CONFIG_ENV_VAR: &str = "BATCHSPAWN_CONFIG_PATH";
const STATE_FILE_NAME: &str = "state.json";
const DEFAULT_PORT: u16 = 8888;
const DEFAULT_START_TIMEOUT_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_TOKEN_SAFETY_MARGIN_SECS: u64 = 30;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    verbose: Option<bool>,
    port: Option<u16>,
    start_timeout_secs: Option<u64>,
    state_file: Option<String>,
    polling_with_service_account: Option<bool>,
    #[serde(default)]
    controller: ControllerSection,
    #[serde(default)]
    states: StatesSection,
    auth: Option<AuthSection>,
    service_account: Option<ServiceAccountSection>,
    gateway: Option<GatewaySection>,
    #[serde(default)]
    job: JobSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ControllerSection {
    poll_interval_secs: u64,
    startup_poll_interval_ms: u64,
    visibility_retry_interval_ms: u64,
    steady_visibility_attempts: u32,
    stop_confirm_attempts: u32,
    stop_confirm_interval_ms: u64,
    progress_interval_ms: u64,
    base64_env_keys: Vec<String>,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            startup_poll_interval_ms: 500,
            visibility_retry_interval_ms: 1000,
            steady_visibility_attempts: 5,
            stop_confirm_attempts: 10,
            stop_confirm_interval_ms: 1000,
            progress_interval_ms: 1000,
            base64_env_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StatesSection {
    pending_pattern: String,
    running_pattern: String,
    unknown_pattern: String,
    exec_host_pattern: String,
    exec_host_template: String,
    exec_host_command: Vec<String>,
}

impl Default for StatesSection {
    fn default() -> Self {
        Self {
            pending_pattern: SLURM_PENDING_PATTERN.to_string(),
            running_pattern: SLURM_RUNNING_PATTERN.to_string(),
            unknown_pattern: SLURM_UNKNOWN_PATTERN.to_string(),
            exec_host_pattern: SLURM_EXEC_HOST_PATTERN.to_string(),
            exec_host_template: String::new(),
            exec_host_command: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthSection {
    token_url: String,
    client_id: String,
    client_secret: String,
    token_safety_margin_secs: Option<u64>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceAccountSection {
    token_url: Option<String>,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewaySection {
    base_url: String,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobSection {
    batch_script: Option<String>,
    batch_script_file: Option<String>,
    cmd: Vec<String>,
    #[serde(flatten)]
    request: JobRequest,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub token_url: String,
    pub client: ClientSecret,
    pub safety_margin: time::Duration,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_url", &self.token_url)
            .field("client", &self.client)
            .field("safety_margin", &self.safety_margin)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAccountConfig {
    pub token_url: String,
    pub client: ClientSecret,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct Config {
    pub verbose: bool,
    pub start_timeout: Duration,
    pub state_file: PathBuf,
    /// Cadence the host should use for steady-state polls.
    pub poll_interval: Duration,
    pub controller: ControllerSettings,
    pub patterns: StatePatterns,
    /// Program looking up the execution host; empty means the host pattern
    /// is used.
    pub exec_host_command: Vec<String>,
    pub auth: AuthConfig,
    /// Only set when polls should run under the service account.
    pub service_account: Option<ServiceAccountConfig>,
    pub gateway: GatewayConfig,
    pub cmd: Vec<String>,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub state_file: ConfigValue<PathBuf>,
    pub start_timeout_secs: ConfigValue<u64>,
    pub port: ConfigValue<u16>,
    pub verbose: ConfigValue<bool>,
    pub refresh_token: Option<ConfigSource>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub state_file: Option<PathBuf>,
    pub refresh_token: Option<String>,
    pub port: Option<u16>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (state_file, state_file_source) = match overrides.state_file {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match file_config.state_file.as_deref() {
            Some(raw) => (resolve_path(raw, base_dir), ConfigSource::ConfigFile),
            None => (
                default_state_path().with_context(|| {
                    "failed to resolve default state file path; specify --state-file or set state_file in the config file"
                })?,
                ConfigSource::Default,
            ),
        },
    };

    let (port, port_source) = match overrides.port {
        Some(port) => (port, ConfigSource::Override),
        None => match file_config.port {
            Some(port) => (port, ConfigSource::ConfigFile),
            None => (DEFAULT_PORT, ConfigSource::Default),
        },
    };
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let (verbose, verbose_source) = match overrides.verbose {
        Some(verbose) => (verbose, ConfigSource::Override),
        None => match file_config.verbose {
            Some(verbose) => (verbose, ConfigSource::ConfigFile),
            None => (false, ConfigSource::Default),
        },
    };
    let (start_timeout_secs, start_timeout_source) = match file_config.start_timeout_secs {
        Some(secs) => (secs, ConfigSource::ConfigFile),
        None => (DEFAULT_START_TIMEOUT_SECS, ConfigSource::Default),
    };

    let FileConfig {
        polling_with_service_account,
        controller,
        states,
        auth,
        service_account,
        gateway,
        job,
        ..
    } = file_config;

    let auth = auth.context("missing [auth] section in config")?;
    let (refresh_token, refresh_token_source) = match overrides.refresh_token {
        Some(token) => (Some(token), Some(ConfigSource::Override)),
        None => match auth.refresh_token.filter(|token| !token.is_empty()) {
            Some(token) => (Some(token), Some(ConfigSource::ConfigFile)),
            None => (None, None),
        },
    };
    let auth = AuthConfig {
        client: ClientSecret {
            client_id: auth.client_id,
            client_secret: auth.client_secret,
        },
        safety_margin: seconds(
            auth.token_safety_margin_secs
                .unwrap_or(DEFAULT_TOKEN_SAFETY_MARGIN_SECS),
        ),
        token_url: auth.token_url,
        refresh_token,
    };

    let service_account = match (service_account, polling_with_service_account) {
        (Some(section), Some(true) | None) => Some(ServiceAccountConfig {
            token_url: section
                .token_url
                .unwrap_or_else(|| auth.token_url.clone()),
            client: ClientSecret {
                client_id: section.client_id,
                client_secret: section.client_secret,
            },
        }),
        (None, Some(true)) => {
            anyhow::bail!("polling_with_service_account is set but [service_account] is missing")
        }
        _ => None,
    };

    let gateway = gateway.context("missing [gateway] section in config")?;
    let gateway = GatewayConfig {
        base_url: gateway.base_url,
        timeout: Duration::from_secs(gateway.timeout_secs.unwrap_or(DEFAULT_GATEWAY_TIMEOUT_SECS)),
    };

    let patterns = StatePatterns {
        pending: states.pending_pattern,
        running: states.running_pattern,
        unknown: states.unknown_pattern,
        exec_host: states.exec_host_pattern,
        exec_host_template: states.exec_host_template,
    };
    JobStateClassifier::new(&patterns).context("invalid [states] section")?;
    if states
        .exec_host_command
        .first()
        .is_some_and(|program| program.trim().is_empty())
    {
        anyhow::bail!("[states].exec_host_command must start with a program name");
    }

    if job.request.host.trim().is_empty() {
        anyhow::bail!("[job].host must name the target system");
    }
    if controller.stop_confirm_attempts == 0 {
        anyhow::bail!("[controller].stop_confirm_attempts must be at least 1");
    }
    let batch_script = match (job.batch_script, job.batch_script_file) {
        (Some(_), Some(_)) => {
            anyhow::bail!("set only one of [job].batch_script and [job].batch_script_file")
        }
        (Some(script), None) => script,
        (None, Some(raw)) => {
            let path = resolve_path(&raw, base_dir);
            fs::read_to_string(&path)
                .with_context(|| format!("failed to read batch script {}", path.display()))?
        }
        (None, None) => SLURM_BATCH_SCRIPT.to_string(),
    };

    let settings = ControllerSettings {
        port,
        batch_script,
        request: job.request,
        startup_poll_interval: Duration::from_millis(controller.startup_poll_interval_ms),
        visibility_retry_interval: Duration::from_millis(controller.visibility_retry_interval_ms),
        steady_visibility_attempts: controller.steady_visibility_attempts,
        stop_confirm_attempts: controller.stop_confirm_attempts,
        stop_confirm_interval: Duration::from_millis(controller.stop_confirm_interval_ms),
        progress_interval: Duration::from_millis(controller.progress_interval_ms),
        base64_env_keys: controller.base64_env_keys,
    };

    let config = Config {
        verbose,
        start_timeout: Duration::from_secs(start_timeout_secs),
        state_file,
        poll_interval: Duration::from_secs(controller.poll_interval_secs),
        controller: settings,
        patterns,
        exec_host_command: states.exec_host_command,
        auth,
        service_account,
        gateway,
        cmd: job.cmd,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        state_file: ConfigValue {
            value: config.state_file.clone(),
            source: state_file_source,
        },
        start_timeout_secs: ConfigValue {
            value: start_timeout_secs,
            source: start_timeout_source,
        },
        port: ConfigValue {
            value: port,
            source: port_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
        refresh_token: refresh_token_source,
    };

    Ok(LoadResult { config, report })
}

pub fn ensure_state_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state directory {}", parent.display()))?;
    }
    Ok(())
}

fn seconds(secs: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_state_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME).join(STATE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const MINIMAL: &str = r#"
[auth]
token_url = "https://auth.example.org/token"
client_id = "hub"
client_secret = "s3cret"

[gateway]
base_url = "https://api.example.org"

[job]
host = "cluster1"
"#;

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn clear(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::set_var(self.key, value);
                    }
                }
                None => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::remove_var(self.key);
                    }
                }
            }
        }
    }

    fn write_config(dir: &TempDir, extra_top: &str, extra_tail: &str) -> PathBuf {
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join("batchspawn.toml");
        fs::write(&config_path, format!("{extra_top}\n{MINIMAL}\n{extra_tail}")).unwrap();
        config_path
    }

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let cfg = read_config_file(&config_path, false).unwrap();
        assert!(cfg.auth.is_none());
        assert!(cfg.port.is_none());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let err = read_config_file(&config_path, true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "", "");

        let LoadResult { config, report } =
            load_with_report(Some(config_path.clone()), Overrides::default()).unwrap();

        assert_eq!(config.controller.port, DEFAULT_PORT);
        assert_eq!(config.start_timeout, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.controller.stop_confirm_attempts, 10);
        assert_eq!(config.controller.stop_confirm_interval, Duration::from_secs(1));
        assert_eq!(
            config.controller.startup_poll_interval,
            Duration::from_millis(500)
        );
        assert_eq!(config.auth.safety_margin, time::Duration::seconds(30));
        assert_eq!(config.auth.refresh_token, None);
        assert_eq!(config.patterns, StatePatterns::default());
        assert_eq!(config.controller.batch_script, SLURM_BATCH_SCRIPT);
        assert_eq!(config.controller.request.host, "cluster1");
        assert!(config.service_account.is_none());
        assert!(config.exec_host_command.is_empty());
        assert_eq!(config.config_path, Some(config_path));
        assert_eq!(report.port.source, ConfigSource::Default);
        assert_eq!(report.refresh_token, None);
    }

    #[test]
    fn resolves_relative_paths_from_config_dir() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "state_file = \"state/job.json\"",
            "batch_script_file = \"job.sh\"",
        );
        let config_dir = config_path.parent().unwrap().to_path_buf();
        fs::write(config_dir.join("job.sh"), "#!/bin/bash\n{cmd}\n").unwrap();

        let config = load(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(config.state_file, config_dir.join("state").join("job.json"));
        assert_eq!(config.controller.batch_script, "#!/bin/bash\n{cmd}\n");
    }

    #[test]
    fn cli_overrides_take_precedence_over_file_config() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "port = 40001\nverbose = false\nstate_file = \"from_config.json\"",
            "",
        );

        let LoadResult { config, report } = load_with_report(
            Some(config_path),
            Overrides {
                state_file: Some(PathBuf::from("from_flag.json")),
                refresh_token: Some("REFRESH_FLAG".into()),
                port: Some(40002),
                verbose: Some(true),
            },
        )
        .unwrap();

        assert_eq!(config.state_file, PathBuf::from("from_flag.json"));
        assert_eq!(config.controller.port, 40002);
        assert!(config.verbose);
        assert_eq!(config.auth.refresh_token.as_deref(), Some("REFRESH_FLAG"));
        assert_eq!(report.port.source, ConfigSource::Override);
        assert_eq!(report.refresh_token, Some(ConfigSource::Override));
    }

    #[test]
    fn reads_controller_and_state_sections() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "start_timeout_secs = 60",
            r#"cmd = ["jupyterhub-singleuser"]
partition = "debug"

[controller]
stop_confirm_attempts = 3
startup_poll_interval_ms = 250
base64_env_keys = ["JUPYTERHUB_OAUTH_SCOPES"]

[states]
exec_host_template = "${1}.cluster1.ch"
"#,
        );

        let config = load(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(config.start_timeout, Duration::from_secs(60));
        assert_eq!(config.controller.stop_confirm_attempts, 3);
        assert_eq!(
            config.controller.startup_poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.controller.base64_env_keys,
            vec!["JUPYTERHUB_OAUTH_SCOPES".to_string()]
        );
        assert_eq!(config.controller.request.partition, "debug");
        assert_eq!(config.cmd, vec!["jupyterhub-singleuser".to_string()]);
        assert_eq!(config.patterns.exec_host_template, "${1}.cluster1.ch");
        assert_eq!(config.patterns.pending, SLURM_PENDING_PATTERN);
    }

    #[test]
    fn service_account_defaults_to_auth_token_url() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "",
            "\n[service_account]\nclient_id = \"poller\"\nclient_secret = \"sa\"\n",
        );

        let config = load(Some(config_path), Overrides::default()).unwrap();
        let service_account = config.service_account.unwrap();
        assert_eq!(service_account.token_url, "https://auth.example.org/token");
        assert_eq!(service_account.client.client_id, "poller");
    }

    #[test]
    fn service_account_can_be_disabled_for_polling() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "polling_with_service_account = false",
            "\n[service_account]\nclient_id = \"poller\"\nclient_secret = \"sa\"\n",
        );

        let config = load(Some(config_path), Overrides::default()).unwrap();
        assert!(config.service_account.is_none());
    }

    #[test]
    fn rejects_invalid_state_pattern() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "", "\n[states]\nrunning_pattern = \"(RUNNING\"\n");

        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("running"));
    }

    #[test]
    fn reads_exec_host_command() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "",
            "\n[states]\nexec_host_command = [\"/opt/site/job-host\", \"--short\"]\n",
        );
        let config = load(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(
            config.exec_host_command,
            vec!["/opt/site/job-host".to_string(), "--short".to_string()]
        );

        let config_path = write_config(&dir, "", "\n[states]\nexec_host_command = [\" \"]\n");
        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("exec_host_command"));
    }

    #[test]
    fn rejects_missing_host() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("batchspawn.toml");
        fs::write(&config_path, MINIMAL.replace("host = \"cluster1\"", "")).unwrap();

        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("[job].host"));
    }

    #[test]
    fn rejects_zero_stop_attempts_and_port() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "", "\n[controller]\nstop_confirm_attempts = 0\n");
        let err = load(Some(config_path.clone()), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("stop_confirm_attempts"));

        let err = load(
            Some(config_path),
            Overrides {
                port: Some(0),
                ..Overrides::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn ensure_state_dir_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("nested").join("state.json");
        ensure_state_dir(&state_path).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn env_config_path_used_when_no_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "port = 40001", "");
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, config_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(None, Overrides::default()).unwrap();
        assert_eq!(config.controller.port, 40001);
        assert_eq!(config.config_path, Some(config_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Env));
    }

    #[test]
    fn cli_config_path_takes_precedence_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let env_dir = TempDir::new().unwrap();
        let cli_dir = TempDir::new().unwrap();
        let env_path = write_config(&env_dir, "port = 40001", "");
        let cli_path = write_config(&cli_dir, "port = 40002", "");
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, env_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(Some(cli_path.clone()), Overrides::default()).unwrap();
        assert_eq!(config.controller.port, 40002);
        assert_eq!(config.config_path, Some(cli_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Override));
    }
}
