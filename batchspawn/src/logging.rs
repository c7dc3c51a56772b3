// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const FILTER_ENV_VAR: &str = "BATCHSPAWN_LOG";
const FORMAT_ENV_VAR: &str = "BATCHSPAWN_LOG_FORMAT";
const SPAN_EVENTS_ENV_VAR: &str = "BATCHSPAWN_LOG_SPAN_EVENTS";
const FILE_ENV_VAR: &str = "BATCHSPAWN_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Installs the global subscriber: stderr always, plus a non-blocking file
/// sink when `BATCHSPAWN_LOG_FILE` is set. Stdout is left to command output.
pub fn init(verbose: bool) {
    let format = parse_format(env::var(FORMAT_ENV_VAR).ok().as_deref());
    let span_events = parse_span_events(env::var(SPAN_EVENTS_ENV_VAR).ok().as_deref());

    let file_layer = build_file_writer().map(|(writer, guard)| {
        let _ = FILE_GUARD.set(guard);
        fmt_layer(format, span_events.clone(), writer, false)
    });

    Registry::default()
        .with(build_filter(verbose))
        .with(tracing_error::ErrorLayer::default())
        .with(fmt_layer(format, span_events, std::io::stderr, true))
        .with(file_layer)
        .init();
}

fn fmt_layer<S, W>(
    format: LogFormat,
    span_events: FmtSpan,
    writer: W,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events)
        .with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var(FILTER_ENV_VAR) {
        Ok(value) => EnvFilter::new(value),
        // Quiet dependencies (hyper, reqwest) unless asked for.
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("warn,batchspawn=info"),
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match normalized(value).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(value: Option<&str>) -> FmtSpan {
    match normalized(value).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        Some("full") => FmtSpan::FULL,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(FILE_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_compact() {
        assert_eq!(parse_format(None), LogFormat::Compact);
        assert_eq!(parse_format(Some("  JSON ")), LogFormat::Json);
        assert_eq!(parse_format(Some("pretty")), LogFormat::Pretty);
        assert_eq!(parse_format(Some("xml")), LogFormat::Compact);
    }

    #[test]
    fn span_events_parse_case_insensitively() {
        assert_eq!(parse_span_events(Some("Close")), FmtSpan::CLOSE);
        assert_eq!(parse_span_events(Some("")), FmtSpan::NONE);
        assert_eq!(parse_span_events(None), FmtSpan::NONE);
    }
}
