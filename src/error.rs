//! Error types for cloudcode-auth.

use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for cloudcode-auth.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ────────────────────────────────────────────────────────
    /// OAuth login is disabled by host policy.
    #[error("OAuth is disabled in settings")]
    OauthDisabled,

    // ── Authentication ───────────────────────────────────────────────────────
    /// No stored credentials, or the stored credentials were cleared.
    #[error("Not authenticated - run the login flow first")]
    NotAuthenticated,

    /// A login flow is already in progress in this process. The callback
    /// port is fixed, so a second concurrent flow can never succeed.
    #[error("Login already in progress")]
    LoginInProgress,

    /// The login flow did not complete within the overall timeout.
    #[error("Login timed out waiting for the browser redirect")]
    LoginTimeout,

    /// The provider redirected back with an error instead of a code.
    #[error("Authorization denied by provider: {0}")]
    CallbackDenied(String),

    // ── Protocol ─────────────────────────────────────────────────────────────
    /// The `state` parameter could not be decoded.
    #[error("Invalid OAuth state token: {0}")]
    InvalidState(String),

    /// The verifier recovered from `state` does not match the one this
    /// login attempt generated. Treated as potential tampering.
    #[error("OAuth state verifier mismatch")]
    StateMismatch,

    // ── Token endpoint ───────────────────────────────────────────────────────
    /// The authorization-code exchange was rejected. Carries the raw
    /// response so the cause is diagnosable without a debugger.
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// The refresh grant was rejected. The stored credentials are invalid
    /// and must be cleared; re-login is required.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    // ── Listener ─────────────────────────────────────────────────────────────
    /// The fixed callback port could not be bound.
    #[error("Failed to bind callback listener on port {port}: {source}")]
    CallbackBind {
        /// The fixed, pre-registered port.
        port: u16,
        /// Underlying bind error.
        source: std::io::Error,
    },

    /// The listener shut down before a redirect arrived.
    #[error("Callback listener closed before receiving a redirect")]
    CallbackClosed,

    // ── Endpoint fallback ────────────────────────────────────────────────────
    /// A single endpoint attempt failed. Wrapped into
    /// [`Error::AllEndpointsFailed`] once every candidate has been tried.
    #[error("Endpoint {endpoint} failed: {message}")]
    EndpointFailed {
        /// The endpoint that failed.
        endpoint: String,
        /// What went wrong (status + body, or the transport error).
        message: String,
    },

    // ── Exhaustion ───────────────────────────────────────────────────────────
    /// Every candidate endpoint failed for a single logical request.
    #[error("All endpoints failed; last error: {last}")]
    AllEndpointsFailed {
        /// The last underlying failure.
        last: String,
    },

    /// Rotation found no healthy, unexpired account.
    #[error("No healthy account available")]
    NoAccountAvailable,

    // ── Infrastructure ───────────────────────────────────────────────────────
    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Secret-storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns true if this error means the stored credentials are no
    /// longer usable and the user has to log in again.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Error::NotAuthenticated | Error::RefreshFailed(_))
    }

    /// Returns true for transient failures that may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::AllEndpointsFailed { .. })
    }
}
