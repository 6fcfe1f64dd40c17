// ── Core error types ──
//
// Consumer-facing errors from roster-core. These are NOT API-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<roster_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.
//
// Engine decision paths (sync, onboarding) do not raise these across
// component boundaries; they fold failures into structured results.
// CoreError is for lifecycle and query operations.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ───────────────────────────────────────────
    #[error("Cannot reach {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ─────────────────────────────────────────────────
    #[error("Account not found: {account_id}")]
    AccountNotFound { account_id: String },

    // ── Operation errors ────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Operation failed: {message}")]
    OperationFailed { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── API errors (wrapped, not exposed raw) ───────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ─────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the account-gone deregistration path applies.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AccountNotFound { .. })
    }
}

// ── Conversion from transport-layer errors ──────────────────────────

impl From<roster_api::Error> for CoreError {
    fn from(err: roster_api::Error) -> Self {
        match err {
            roster_api::Error::MissingOwner => CoreError::ValidationFailed {
                message: "cloud calls require an owner scope".into(),
            },
            roster_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        target: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            roster_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            roster_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            roster_api::Error::Cloud { message, status } => CoreError::Api {
                message,
                status: Some(status),
            },
            roster_api::Error::RecordNotFound { identifier } => CoreError::AccountNotFound {
                account_id: identifier,
            },
            roster_api::Error::Host { message } => CoreError::Api {
                message,
                status: None,
            },
            roster_api::Error::PushConnect(reason) => CoreError::ConnectionFailed {
                target: "push channel".into(),
                reason,
            },
            roster_api::Error::PushUnavailable => CoreError::ConnectionFailed {
                target: "push channel".into(),
                reason: "not configured".into(),
            },
            roster_api::Error::Cancelled => CoreError::Cancelled,
            roster_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
