// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "batchspawn",
    version,
    about = "Run a single-user server as an HPC batch job and follow it through the REST gateway",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < BATCHSPAWN_CONFIG_PATH < command-line flags.\n\
If --config is omitted, batchspawn tries BATCHSPAWN_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
The tracked job is kept in the state file between invocations."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, batchspawn uses BATCHSPAWN_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Where the tracked job id and state are stored. Overrides `state_file` from the config file."
    )]
    pub state_file: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "TOKEN",
        env = "BATCHSPAWN_REFRESH_TOKEN",
        hide_env_values = true,
        help = "Initial OAuth2 refresh token. Overrides `auth.refresh_token` from the config file."
    )]
    pub refresh_token: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "PORT",
        help = "Port of the single-user server inside the job. Overrides `port` from the config file."
    )]
    pub port: Option<u16>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Submit the batch job and wait until it runs; prints host and port.
    Start {
        /// Abort (and cancel the job) if it is not running after this many seconds.
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
        /// Extra environment for the job, as KEY=VALUE.
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
        /// Override a substitution variable, as KEY=VALUE.
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        user_options: Vec<(String, String)>,
    },
    /// Check the tracked job once; exits non-zero once it has terminated.
    Poll,
    /// Cancel the tracked job.
    Stop {
        /// Return right after the cancel request without waiting for confirmation.
        #[arg(long)]
        now: bool,
    },
    /// Verify that the refresh token can still be exchanged.
    CheckToken,
    /// Print the persisted job state.
    State,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let verbose_override = matches.get_flag("verbose").then_some(true);
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
