// crates/core/src/config.rs
//! Client configuration.
//!
//! Layering, lowest to highest precedence: built-in defaults, the TOML file
//! (`<config dir>/fedwatch/config.toml` unless a path is given), then
//! `FEDWATCH_*` environment variables. The monitor binary adds CLI flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

/// Reconnect delay schedule of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect after a drop.
    pub base: Duration,
    /// Upper bound of the doubling delay.
    pub ceiling: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// REST base URL, e.g. `http://localhost:8000/api/v1`.
    pub api_url: String,
    /// Stream URL; the access token is appended as `?token=`.
    pub ws_url: String,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Drop the connection when nothing arrives for this long. `None` disables.
    /// The server pings every 30s.
    pub idle_timeout: Option<Duration>,
    /// Override for the persisted credential file.
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            ws_url: derive_ws_url(DEFAULT_API_URL),
            request_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
            idle_timeout: Some(Duration::from_secs(75)),
            credentials_path: None,
        }
    }
}

/// On-disk shape. Every field optional; absent fields keep the lower layer.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    request_timeout_secs: Option<u64>,
    reconnect_base_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    /// 0 disables the idle check.
    idle_timeout_secs: Option<u64>,
    credentials_path: Option<PathBuf>,
}

impl ClientConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fedwatch").join("config.toml"))
    }

    /// Defaults, then the config file, then the process environment.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        match path {
            Some(p) => config.merge_file(p)?,
            None => {
                if let Some(p) = Self::default_path().filter(|p| p.exists()) {
                    config.merge_file(&p)?;
                }
            }
        }
        config.apply_env(|var| std::env::var(var).ok())?;
        tracing::debug!(api_url = %config.api_url, ws_url = %config.ws_url, "client config loaded");
        Ok(config)
    }

    /// Apply a TOML file on top of the current values.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_toml(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn merge_toml(&mut self, raw: &str) -> Result<(), String> {
        let file: FileConfig = toml::from_str(raw).map_err(|e| e.to_string())?;
        if let Some(url) = file.api_url {
            self.set_api_url(url);
        }
        if let Some(url) = file.ws_url {
            self.ws_url = url;
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.reconnect_base_ms {
            self.reconnect.base = Duration::from_millis(ms);
        }
        if let Some(ms) = file.reconnect_max_ms {
            self.reconnect.ceiling = Duration::from_millis(ms);
        }
        if let Some(secs) = file.idle_timeout_secs {
            self.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if file.credentials_path.is_some() {
            self.credentials_path = file.credentials_path;
        }
        Ok(())
    }

    /// Apply `FEDWATCH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FEDWATCH_API_URL") {
            self.set_api_url(url);
        }
        if let Some(url) = lookup("FEDWATCH_WS_URL") {
            self.ws_url = url;
        }
        if let Some(ms) = parse_env(&lookup, "FEDWATCH_RECONNECT_BASE_MS")? {
            self.reconnect.base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env(&lookup, "FEDWATCH_RECONNECT_MAX_MS")? {
            self.reconnect.ceiling = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env(&lookup, "FEDWATCH_IDLE_TIMEOUT_SECS")? {
            self.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(path) = lookup("FEDWATCH_CREDENTIALS") {
            self.credentials_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Set the REST base and re-derive the stream URL from it.
    /// An explicit stream URL set afterwards wins.
    pub fn set_api_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.ws_url = derive_ws_url(&url);
        self.api_url = url.trim_end_matches('/').to_string();
    }

    /// Absolute URL for an API path such as `/auth/login`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

fn parse_env<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}

/// `http(s)://host/api/v1` → `ws(s)://host/api/v1/ws`
pub fn derive_ws_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/ws")
}
