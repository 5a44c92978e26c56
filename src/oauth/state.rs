//! OAuth `state` parameter codec.
//!
//! The state carries the PKCE verifier (and an optional project hint)
//! through the provider redirect as base64url-encoded JSON, so no
//! server-side session storage is needed to complete the exchange.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Contents of the OAuth `state` parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    /// The PKCE verifier of the login attempt that built this state.
    pub verifier: String,
    /// Optional project hint supplied by the caller.
    #[serde(rename = "projectId", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl AuthState {
    /// Encode as base64url(JSON), no padding.
    pub fn encode(&self) -> String {
        // Serialization of this struct cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode from the `state` query parameter.
    ///
    /// Any malformed input is rejected as [`Error::InvalidState`]; a state
    /// that does not decode is never accepted.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::InvalidState(format!("bad base64: {}", e)))?;
        let json = String::from_utf8(bytes)
            .map_err(|e| Error::InvalidState(format!("not UTF-8: {}", e)))?;
        serde_json::from_str(&json).map_err(|e| Error::InvalidState(format!("bad JSON: {}", e)))
    }
}
