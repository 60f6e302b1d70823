//! ---
//! lpm_section: "01-core-functionality"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Shared primitives and utilities for the migration harness."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "LPM_LOG";
const DEFAULT_DIRECTIVE: &str = "debug";

/// Writer guards must outlive the process or buffered lines are lost on exit.
static GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Pick the filter directive: `LPM_LOG`, then `RUST_LOG`, then `debug`.
fn resolve_filter(lpm_log: Option<String>, rust_log: Option<String>) -> EnvFilter {
    let directive = lpm_log
        .filter(|d| !d.trim().is_empty())
        .map(|d| (LOG_ENV, d))
        .or_else(|| rust_log.map(|d| ("RUST_LOG", d)));
    match directive {
        Some((source, directive)) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("ignoring invalid {source} directive `{directive}`: {err}");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

/// Install the process-wide subscriber for a harness binary.
///
/// Console output goes to stderr so stdout stays free for reports, dry-run
/// transcripts and metrics. Every event is also appended as JSON to a daily
/// file in `config.directory`, which is what gets attached to a failed
/// migration ticket. A second call keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("unable to create log directory {}", config.directory.display())
    })?;
    let file_name = format!(
        "{}.log",
        config.file_prefix.as_deref().unwrap_or(service_name)
    );
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, file_name));
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());

    let console = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .with_current_span(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .compact()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
    };
    let transcript = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    let installed = tracing_subscriber::registry()
        .with(resolve_filter(
            std::env::var(LOG_ENV).ok(),
            std::env::var("RUST_LOG").ok(),
        ))
        .with(console)
        .with(transcript)
        .try_init()
        .is_ok();
    if installed {
        let _ = GUARDS.set([file_guard, console_guard]);
    }

    info!(service = service_name, log_dir = %config.directory.display(), format = ?config.format, installed, "tracing initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lpm_log_wins_over_rust_log() {
        let filter = resolve_filter(Some("lpm_transport=trace".into()), Some("warn".into()));
        assert_eq!(filter.to_string(), "lpm_transport=trace");
    }

    #[test]
    fn blank_lpm_log_falls_back_to_rust_log() {
        let filter = resolve_filter(Some("  ".into()), Some("info".into()));
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn defaults_to_debug() {
        assert_eq!(resolve_filter(None, None).to_string(), "debug");
    }
}
