// roster-core: reconciliation engine between roster-api and consumers.
//
// Owns the authoritative status cache, the bidirectional sync decision
// matrix, and the multi-account onboarding flow. Everything here is
// explicitly constructed and injected -- no ambient module state.

pub mod account_store;
pub mod config;
pub mod cookies;
pub mod debounce;
pub mod error;
pub mod model;
pub mod monitor;
pub mod normalize;
pub mod onboard;
pub mod ratelimit;
pub mod singleflight;
pub mod store;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use account_store::{AccountStore, LocalAccountRecord, MemoryAccountStore};
pub use config::EngineConfig;
pub use error::CoreError;
pub use monitor::StatusMonitor;
pub use onboard::{CreateConfig, CreateItem, CreateState, LoginWay, OnboardStep, OnboardingSession};
pub use ratelimit::RateLimiter;
pub use singleflight::SingleFlight;
pub use store::StatusStore;
pub use sync::{FullSyncReport, NameSyncReport, SyncAction, SyncEngine, SyncResult};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AccountId, AccountInfo, CachedStatus, CookieStatus, LoginMethod, MonitorEvent, StatusSummary,
};
