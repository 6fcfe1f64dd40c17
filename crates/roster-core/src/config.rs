// ── Runtime engine configuration ──
//
// Describes *how* the engine connects and paces itself. Built by the
// CLI (via roster-config) and handed in -- core never reads config
// files.

use std::time::Duration;

use roster_api::PushConfig;
use url::Url;

/// Configuration for one reconciliation engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cloud backend base URL.
    pub cloud_url: Url,
    /// Local automation host base URL (e.g., `http://127.0.0.1:54345/`).
    pub host_url: Url,
    /// Tenant scope applied to every cloud call. Mandatory.
    pub owner: String,
    /// Restrict monitoring to profiles created by this host user.
    /// `None` tracks every profile the host lists.
    pub creator_filter: Option<String>,
    /// Push channel endpoint and reconnect tuning.
    pub push: PushConfig,
    /// Request timeout for both HTTP surfaces.
    pub timeout: Duration,
    /// Host API budget in requests per second, shared process-wide.
    /// Licensed host installs sustain 8/s; unlicensed ones only 2/s.
    pub host_rate_per_sec: u32,
    /// Cache entries older than this trigger a background refresh on read.
    pub cache_ttl: Duration,
    /// Quiet period before a burst of expiries flushes one notification.
    pub expiry_debounce: Duration,
    /// Interval of the login-status poke poll during onboarding.
    pub poll_interval: Duration,
    /// Delay between serially generated login links.
    pub creation_stagger: Duration,
    /// Upper bound on simultaneous onboarding slots.
    pub max_onboarding_accounts: usize,
}

impl EngineConfig {
    /// Sensible defaults around the given endpoints and owner.
    pub fn new(cloud_url: Url, host_url: Url, owner: impl Into<String>) -> Self {
        Self {
            cloud_url,
            host_url,
            owner: owner.into(),
            creator_filter: None,
            push: PushConfig::default(),
            timeout: Duration::from_secs(30),
            host_rate_per_sec: 2,
            cache_ttl: Duration::from_secs(10 * 60),
            expiry_debounce: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            creation_stagger: Duration::from_millis(300),
            max_onboarding_accounts: 10,
        }
    }
}
