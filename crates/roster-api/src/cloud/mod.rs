//! Cloud backend client.
//!
//! The cloud is the source of record for account state: it mints login
//! links, validates session cookies upstream, and stores the per-account
//! status that the push channel broadcasts. All calls are scoped to an
//! `owner` for multi-tenant isolation.

mod client;
mod types;

pub use client::CloudClient;
pub use types::{
    AccountInfo, AccountStatus, BatchStatus, CleanupReport, CookieBundle, CookieItem, LoginLink,
    LoginState, Registration, ValidationOutcome,
};
