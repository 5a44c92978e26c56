//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! - [`PkcePair`] - S256 verifier/challenge generation
//! - [`AuthState`] - the `state` parameter codec carrying the verifier
//! - [`build_authorization_url`] - authorization URL builder
//! - [`CallbackListener`] - one-shot local redirect listener
//! - [`TokenExchanger`] - code exchange and refresh grants
//!
//! The pieces are deliberately independent; the credential store in
//! [`crate::store`] wires them into the interactive login sequence.

pub mod callback;
pub mod exchange;
pub mod pkce;
pub mod state;

pub use callback::{CallbackListener, CallbackOutcome};
pub use exchange::{RefreshedToken, TokenExchange, TokenExchanger};
pub use pkce::PkcePair;
pub use state::AuthState;

use crate::config::AuthConfig;

/// An authorization URL plus the verifier needed to complete the exchange.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL the user's browser should open.
    pub url: String,
    /// The PKCE verifier for this attempt. Held by the caller and checked
    /// against the verifier recovered from the callback state.
    pub verifier: String,
}

/// Build the provider authorization URL for a fresh login attempt.
///
/// Generates a new PKCE pair, encodes the verifier (and optional project
/// hint) into the `state` parameter, and assembles the URL.
///
/// `access_type=offline` and `prompt=consent` are both required so a
/// refresh token is returned on every login, not just the first.
pub fn build_authorization_url(
    config: &AuthConfig,
    project_id: Option<&str>,
) -> AuthorizationRequest {
    let pkce = PkcePair::generate();
    let state = AuthState {
        verifier: pkce.verifier.clone(),
        project_id: project_id.map(|s| s.to_string()),
    };
    let scopes = config.scopes.join(" ");

    let url = format!(
        "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method={}&state={}&access_type=offline&prompt=consent",
        config.auth_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri()),
        urlencoding::encode(&scopes),
        urlencoding::encode(&pkce.challenge),
        pkce::PKCE_METHOD,
        urlencoding::encode(&state.encode()),
    );

    AuthorizationRequest {
        url,
        verifier: pkce.verifier,
    }
}
