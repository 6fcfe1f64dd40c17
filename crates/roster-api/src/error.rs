use thiserror::Error;

/// Top-level error type for the `roster-api` crate.
///
/// Covers every failure mode across all three surfaces: the cloud HTTP
/// API, the local automation host RPC, and the push channel.
/// `roster-core` maps these into domain-appropriate variants.
#[derive(Debug, Error)]
pub enum Error {
    // ── Validation ──────────────────────────────────────────────────
    /// An owner scope is required for every cloud call. Constructing a
    /// request without one is a caller bug, caught before any I/O.
    #[error("Cloud request is missing the owner scope")]
    MissingOwner,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Cloud API ───────────────────────────────────────────────────
    /// Structured error from the cloud API envelope.
    #[error("Cloud API error (HTTP {status}): {message}")]
    Cloud { message: String, status: u16 },

    /// The requested record does not exist server-side. This is a
    /// signal (deregister locally), not a failure.
    #[error("Record not found: {identifier}")]
    RecordNotFound { identifier: String },

    // ── Automation host ─────────────────────────────────────────────
    /// Error reported by the local automation host envelope.
    #[error("Automation host error: {message}")]
    Host { message: String },

    // ── Push channel ────────────────────────────────────────────────
    /// Push channel connection failed.
    #[error("Push channel connection failed: {0}")]
    PushConnect(String),

    /// Push channel is not configured (no endpoint).
    #[error("Push channel unavailable -- falling back to polling")]
    PushUnavailable,

    // ── Cancellation ────────────────────────────────────────────────
    /// An in-flight request was abandoned via its cancellation token.
    /// Distinct from a network failure: the caller asked for this.
    #[error("Request cancelled")]
    Cancelled,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::PushConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "record deleted server-side" signal.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::RecordNotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Cloud { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the operation was cancelled by its caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
