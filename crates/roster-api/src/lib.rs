// roster-api: transport layer for the roster engine.
//
// Three surfaces: the cloud backend (HTTP, source of record), the local
// automation host (RPC over localhost HTTP), and the push channel
// (WebSocket change notifications).

pub mod cloud;
pub mod error;
pub mod host;
pub mod push;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cloud::{
    AccountInfo, AccountStatus, BatchStatus, CleanupReport, CloudClient, CookieBundle, CookieItem,
    LoginLink, LoginState, Registration, ValidationOutcome,
};
pub use error::Error;
pub use host::{HostClient, ProfilePage, ProfileSpec, ProfileSummary};
pub use push::{PushChannel, PushConfig, PushEvent, PushHandler, PushOldData, ReconnectConfig};
pub use transport::TransportConfig;
