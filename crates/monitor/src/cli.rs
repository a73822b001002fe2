// crates/monitor/src/cli.rs
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fedwatch_core::ClientConfig;
use fedwatch_observability::{LogFormat, LogOptions};

#[derive(Debug, Parser)]
#[command(name = "fedwatch", version, about = "Federated IDS dashboard monitor")]
pub struct Cli {
    /// Config file (default: <config dir>/fedwatch/config.toml).
    #[arg(long, env = "FEDWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// REST base URL, e.g. https://ids.example.com/api/v1.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Stream URL. Derived from --api-url when omitted.
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Tracing filter directives; overrides RUST_LOG.
    #[arg(long, env = "FEDWATCH_LOG", global = true)]
    pub log: Option<String>,

    #[arg(long, env = "FEDWATCH_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Also write a daily-rolling log file into this directory.
    #[arg(long, env = "FEDWATCH_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Write the log file to <data dir>/fedwatch/logs unless --log-dir is set.
    #[arg(long, global = true)]
    pub log_file: bool,

    #[arg(long, env = "FEDWATCH_SENTRY_DSN", hide_env_values = true, global = true)]
    pub sentry_dsn: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Exchange username/password for a stored session.
    Login {
        #[arg(long, env = "FEDWATCH_USERNAME")]
        username: String,
        #[arg(long, env = "FEDWATCH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    /// Show the logged-in user.
    Whoami,
    /// One-shot federated training status over REST.
    Status,
    /// Follow the live stream and print a summary periodically.
    Watch {
        /// Seconds between summaries.
        #[arg(long, default_value_t = 10)]
        every: u64,
        /// Print full JSON snapshots instead of a summary line.
        #[arg(long)]
        json: bool,
        /// Clear the round log and client progress when a training run starts.
        #[arg(long)]
        reset_on_start: bool,
    },
}

impl Cli {
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            filter: self.log.clone(),
            format: self.log_format,
            log_dir: self.log_dir.clone().or_else(|| {
                self.log_file
                    .then(LogOptions::default_log_dir)
                    .flatten()
            }),
            sentry_dsn: self.sentry_dsn.clone(),
            release: Some(concat!("fedwatch@", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }

    /// Flags are the top configuration layer.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.api_url {
            config.set_api_url(url.clone());
        }
        if let Some(url) = &self.ws_url {
            config.ws_url = url.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "fedwatch",
            "--api-url",
            "https://ids.example.com/api/v1",
            "watch",
            "--every",
            "5",
        ]);
        let mut config = ClientConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.ws_url, "wss://ids.example.com/api/v1/ws");
        assert!(matches!(cli.command, Command::Watch { every: 5, json: false, .. }));
    }

    #[test]
    fn test_explicit_ws_url_wins() {
        let cli = Cli::parse_from([
            "fedwatch",
            "--api-url",
            "http://a/api/v1",
            "--ws-url",
            "ws://b/live",
            "status",
        ]);
        let mut config = ClientConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.api_url, "http://a/api/v1");
        assert_eq!(config.ws_url, "ws://b/live");
    }

    #[test]
    fn test_log_file_uses_default_dir() {
        let cli = Cli::parse_from(["fedwatch", "--log-file", "whoami"]);
        assert_eq!(cli.log_options().log_dir, LogOptions::default_log_dir());

        let cli = Cli::parse_from(["fedwatch", "--log-file", "--log-dir", "/tmp/fw", "whoami"]);
        assert_eq!(cli.log_options().log_dir, Some(PathBuf::from("/tmp/fw")));

        let cli = Cli::parse_from(["fedwatch", "whoami"]);
        assert_eq!(cli.log_options().log_dir, None);
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::parse_from(["fedwatch", "--log-format", "json", "whoami"]);
        assert_eq!(cli.log_options().format, LogFormat::Json);
    }
}
