//! Engine construction from configuration.
//!
//! Resolves the active profile (config file + CLI flag overrides) and
//! wires up the full component stack: transport clients, push channel,
//! rate limiter, account store, sync engine, and status monitor.

use std::sync::Arc;

use roster_api::{CloudClient, HostClient, PushChannel, TransportConfig};
use roster_config::{Config, JsonAccountStore};
use roster_core::{
    AccountStore, EngineConfig, OnboardingSession, RateLimiter, StatusMonitor, SyncEngine,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The wired-up component stack behind every engine-backed command.
pub struct Engine {
    pub config: EngineConfig,
    pub cloud: Arc<CloudClient>,
    pub host: Arc<HostClient>,
    pub push: PushChannel,
    pub limiter: Arc<RateLimiter>,
    pub accounts: Arc<JsonAccountStore>,
    pub sync: SyncEngine,
    pub monitor: StatusMonitor,
}

impl Engine {
    /// Build the stack from the active profile plus CLI overrides.
    pub fn build(global: &GlobalOpts) -> Result<Self, CliError> {
        let config = resolve_engine_config(global)?;

        let transport = TransportConfig {
            timeout: config.timeout,
        };
        let cloud = Arc::new(
            CloudClient::new(config.cloud_url.clone(), config.owner.clone(), &transport)
                .map_err(|e| CliError::Validation {
                    field: "owner".into(),
                    reason: e.to_string(),
                })?,
        );
        let host = Arc::new(
            HostClient::new(config.host_url.clone(), &transport).map_err(|e| {
                CliError::Validation {
                    field: "host_url".into(),
                    reason: e.to_string(),
                }
            })?,
        );
        let push = PushChannel::new(config.push.clone());
        let limiter = Arc::new(RateLimiter::per_second(config.host_rate_per_sec));
        let accounts = Arc::new(JsonAccountStore::load(roster_config::accounts_path())?);

        let sync = SyncEngine::new(
            Arc::clone(&cloud),
            Arc::clone(&host),
            Arc::clone(&accounts) as Arc<dyn AccountStore>,
            Arc::clone(&limiter),
        );
        let monitor = StatusMonitor::new(
            &config,
            Arc::clone(&cloud),
            Arc::clone(&host),
            push.clone(),
            Arc::clone(&accounts) as Arc<dyn AccountStore>,
            Arc::clone(&limiter),
            sync.clone(),
        );

        Ok(Self {
            config,
            cloud,
            host,
            push,
            limiter,
            accounts,
            sync,
            monitor,
        })
    }

    /// Start an onboarding session against this engine's monitor.
    pub fn onboarding(&self) -> OnboardingSession {
        OnboardingSession::new(
            &self.config,
            Arc::clone(&self.cloud),
            Arc::clone(&self.host),
            Arc::clone(&self.limiter),
            self.monitor.clone(),
            Arc::clone(&self.accounts) as Arc<dyn AccountStore>,
        )
    }
}

/// Resolve the active profile name: `--profile` flag, then the config
/// file's `default_profile`, then `"default"`.
fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

fn resolve_engine_config(global: &GlobalOpts) -> Result<EngineConfig, CliError> {
    let cfg = roster_config::load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut config = if let Some(profile) = cfg.profiles.get(&profile_name) {
        roster_config::profile_to_engine_config(profile, &cfg.defaults)?
    } else if global.profile.is_some() {
        // An explicitly requested profile that does not exist is an
        // error; an absent default just falls through to flags.
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: {
                let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
                names.sort_unstable();
                names.join(", ")
            },
        });
    } else {
        engine_config_from_flags(global)?
    };

    // CLI flags override whatever the profile said.
    if let Some(ref raw) = global.cloud_url {
        config.cloud_url = parse_url("cloud-url", raw)?;
    }
    if let Some(ref raw) = global.host_url {
        config.host_url = parse_url("host-url", raw)?;
    }
    if let Some(ref owner) = global.owner {
        config.owner.clone_from(owner);
    }

    Ok(config)
}

/// No profile configured at all: cloud URL and owner must come from
/// flags / env vars.
fn engine_config_from_flags(global: &GlobalOpts) -> Result<EngineConfig, CliError> {
    let (Some(cloud_raw), Some(owner)) = (&global.cloud_url, &global.owner) else {
        return Err(CliError::NoConfig {
            path: roster_config::config_path().display().to_string(),
        });
    };

    let cloud_url = parse_url("cloud-url", cloud_raw)?;
    let host_url = parse_url(
        "host-url",
        global
            .host_url
            .as_deref()
            .unwrap_or("http://127.0.0.1:54345/"),
    )?;

    Ok(EngineConfig::new(cloud_url, host_url, owner.clone()))
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}
