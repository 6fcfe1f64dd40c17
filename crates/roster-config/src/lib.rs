//! On-disk configuration for roster.
//!
//! TOML profiles with `ROSTER_`-prefixed environment overrides, and
//! translation to `roster_core::EngineConfig`. The CLI depends on this
//! crate; `roster-core` itself never reads config files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use roster_api::PushConfig;
use roster_core::EngineConfig;

mod store;

pub use store::JsonAccountStore;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("account store corrupt at {path}: {reason}")]
    StoreCorrupt { path: String, reason: String },

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
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named deployment profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Host API budget in requests per second. Licensed automation-host
    /// installs sustain 8/s; unlicensed ones only 2/s.
    #[serde(default = "default_host_rate")]
    pub host_rate_per_sec: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
            host_rate_per_sec: default_host_rate(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_host_rate() -> u32 {
    2
}

/// A named deployment profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Cloud backend base URL.
    pub cloud_url: String,

    /// Local automation host base URL.
    #[serde(default = "default_host_url")]
    pub host_url: String,

    /// Tenant scope applied to every cloud call.
    pub owner: String,

    /// Restrict monitoring to profiles created by this host user.
    pub creator_filter: Option<String>,

    /// Push channel WebSocket endpoint. Omitting it disables realtime
    /// updates; the engine degrades to polling.
    pub push_url: Option<String>,

    /// Push channel bearer token (plaintext -- prefer the env variant).
    pub push_auth_key: Option<String>,

    /// Environment variable name containing the push bearer token.
    pub push_auth_key_env: Option<String>,

    /// Override the default host rate budget.
    pub host_rate_per_sec: Option<u32>,

    /// Override timeout in seconds.
    pub timeout: Option<u64>,

    /// Override the status cache TTL in seconds.
    pub cache_ttl_secs: Option<u64>,
}

fn default_host_url() -> String {
    "http://127.0.0.1:54345/".into()
}

// ── Paths ───────────────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "roster", "roster").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Resolve the local account metadata file path.
pub fn accounts_path() -> PathBuf {
    ProjectDirs::from("dev", "roster", "roster").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("accounts.json");
            p
        },
        |dirs| dirs.data_dir().join("accounts.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("roster");
    p
}

// ── Config loading / saving ─────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("ROSTER_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Translation to EngineConfig ─────────────────────────────────────

/// Resolve the push channel bearer token: env variable first, plaintext
/// config value second.
pub fn resolve_push_auth(profile: &Profile) -> Option<SecretString> {
    if let Some(ref env_name) = profile.push_auth_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }
    profile
        .push_auth_key
        .as_ref()
        .map(|key| SecretString::from(key.clone()))
}

/// Build an `EngineConfig` from a profile.
pub fn profile_to_engine_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    let cloud_url: url::Url = profile
        .cloud_url
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "cloud_url".into(),
            reason: format!("invalid URL: {}", profile.cloud_url),
        })?;
    let host_url: url::Url = profile
        .host_url
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "host_url".into(),
            reason: format!("invalid URL: {}", profile.host_url),
        })?;

    if profile.owner.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "owner".into(),
            reason: "an owner scope is required for every cloud call".into(),
        });
    }

    let push_url = profile
        .push_url
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|_| ConfigError::Validation {
            field: "push_url".into(),
            reason: format!("invalid URL: {}", profile.push_url.as_deref().unwrap_or("")),
        })?;

    let mut config = EngineConfig::new(cloud_url, host_url, profile.owner.clone());
    config.creator_filter = profile.creator_filter.clone();
    config.push = PushConfig {
        url: push_url,
        auth_key: resolve_push_auth(profile),
        ..PushConfig::default()
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.host_rate_per_sec = profile
        .host_rate_per_sec
        .unwrap_or(defaults.host_rate_per_sec);
    if let Some(ttl) = profile.cache_ttl_secs {
        config.cache_ttl = Duration::from_secs(ttl);
    }

    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────
