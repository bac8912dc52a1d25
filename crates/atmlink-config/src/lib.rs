//! Shared configuration for the atmlink CLI.
//!
//! TOML profiles, platform config paths, environment overrides, and
//! translation to `atmlink_core::ClientConfig`. Also hosts the file-backed
//! session flag store used to remember the initial connection check.

mod session;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use atmlink_core::ClientConfig;

pub use session::FileSessionStore;

/// Endpoint written into a freshly initialised config.
pub const DEFAULT_URL: &str = "ws://localhost:8082/ws";

const ENV_PREFIX: &str = "ATMLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    ProfileNotFound { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to encode session file: {0}")]
    Session(#[from] serde_json::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named simulation server profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// A config with one `default` profile pointing at a local server.
    pub fn starter() -> Self {
        let mut config = Self::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                url: DEFAULT_URL.into(),
                ..Profile::default()
            },
        );
        config
    }

    /// Pick the profile named `name`, else the configured default.
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::ProfileNotFound { name }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Seconds to wait for the server before giving up.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Client keep-alive period in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_max_reconnect_attempts() -> u32 {
    atmlink_core::config::DEFAULT_MAX_RECONNECT_ATTEMPTS
}
fn default_heartbeat_interval() -> f64 {
    atmlink_core::config::DEFAULT_HEARTBEAT_INTERVAL.as_secs_f64()
}

/// A named simulation server profile. Unset fields fall back to
/// [`Defaults`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// WebSocket endpoint (e.g., "ws://localhost:8082/ws").
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_initial_delay_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "atmlink", "atmlink")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory for per-session state files. Prefers the runtime directory,
/// which the OS clears on logout.
pub fn session_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("sessions"),
        |dirs| {
            dirs.runtime_dir()
                .map_or_else(|| dirs.cache_dir().join("sessions"), Path::to_path_buf)
        },
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("atmlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (a missing file is fine) layered under `ATMLINK_*`
/// environment variables. Nested keys use `__`, e.g.
/// `ATMLINK_DEFAULTS__TIMEOUT=30`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Parse and check a WebSocket endpoint.
pub fn parse_ws_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{other}://'"),
        }),
    }
}

/// Build a `ClientConfig` from a profile, filling gaps from `defaults`.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let url = parse_ws_url(&profile.url)?;

    let heartbeat = profile.heartbeat_interval.unwrap_or(defaults.heartbeat_interval);
    if !heartbeat.is_finite() || heartbeat <= 0.0 {
        return Err(ConfigError::Validation {
            field: "heartbeat_interval".into(),
            reason: format!("must be a positive number of seconds, got {heartbeat}"),
        });
    }

    let mut config = ClientConfig::new(url);
    config.reconnect.max_attempts = profile
        .max_reconnect_attempts
        .unwrap_or(defaults.max_reconnect_attempts);
    if let Some(ms) = profile.reconnect_initial_delay_ms {
        config.reconnect.initial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = profile.reconnect_max_delay_ms {
        config.reconnect.max_delay = Duration::from_millis(ms);
    }
    if config.reconnect.max_delay < config.reconnect.initial_delay {
        return Err(ConfigError::Validation {
            field: "reconnect_max_delay_ms".into(),
            reason: "must not be below reconnect_initial_delay_ms".into(),
        });
    }
    config.heartbeat_interval = Duration::from_secs_f64(heartbeat);
    config.connect_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────
