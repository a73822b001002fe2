// crates/observability/src/lib.rs
//! Process-wide tracing setup for fedwatch binaries.
//!
//! One call to [`init`] installs:
//! - an `EnvFilter` (`RUST_LOG`, else [`DEFAULT_FILTER`]),
//! - a stderr layer, human-readable or JSON,
//! - an optional daily-rolling log file,
//! - an optional Sentry layer when a DSN is configured.
//!
//! Keep the returned [`ObservabilityGuard`] alive for the whole process; dropping
//! it flushes the file writer and the Sentry transport.

use std::borrow::Cow;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "warn,fedwatch=info,fedwatch_core=info";

/// File name prefix of rolled log files.
const LOG_FILE_PREFIX: &str = "fedwatch.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact single-line output for terminals.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}` (expected pretty|json)")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Overrides `RUST_LOG` and the default filter.
    pub filter: Option<String>,
    pub format: LogFormat,
    /// Directory for the rolling log file. `None` disables file output.
    pub log_dir: Option<PathBuf>,
    /// Sentry DSN. `None` or empty disables error reporting.
    pub sentry_dsn: Option<String>,
    /// Release name reported to Sentry.
    pub release: Option<String>,
}

impl LogOptions {
    /// `<data dir>/fedwatch/logs`
    pub fn default_log_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("fedwatch").join("logs"))
    }

    fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        }
    }
}

/// Flushes background writers on drop.
#[must_use = "dropping the guard stops file logging and Sentry reporting"]
pub struct ObservabilityGuard {
    _file: Option<WorkerGuard>,
    sentry: Option<sentry::ClientInitGuard>,
}

impl ObservabilityGuard {
    pub fn sentry_enabled(&self) -> bool {
        self.sentry.as_ref().is_some_and(|g| g.is_enabled())
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(options: &LogOptions) -> anyhow::Result<ObservabilityGuard> {
    let sentry_guard = options
        .sentry_dsn
        .as_deref()
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: options.release.clone().map(Cow::Owned),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

    let (file_layer, file_guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_target(true).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (pretty, json) = match options.format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(true).compact()),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .flatten_event(true),
            ),
        ),
    };

    let sentry_layer = sentry_guard.as_ref().map(|_| sentry_tracing::layer());

    tracing_subscriber::registry()
        .with(options.env_filter())
        .with(pretty)
        .with(json)
        .with(file_layer)
        .with(sentry_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    tracing::debug!(
        format = ?options.format,
        file = options.log_dir.is_some(),
        sentry = sentry_guard.is_some(),
        "tracing initialized"
    );

    Ok(ObservabilityGuard {
        _file: file_guard,
        sentry: sentry_guard,
    })
}
