//! Configuration for the auth engine.
//!
//! [`AuthConfig`] carries everything that is fixed per OAuth client
//! registration (credentials, endpoints, the callback port) plus the tunable
//! resilience knobs. [`AuthSettings`] is the small host-controlled surface:
//! feature toggles and manual overrides read from the editor's settings.

use std::time::Duration;

use crate::constants;
use crate::subscription::SubscriptionTier;

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

/// Static configuration for the OAuth flow and the Cloud Code API.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret (required by Google even with PKCE).
    pub client_secret: String,
    /// Authorization endpoint.
    pub auth_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Userinfo endpoint for the best-effort email lookup.
    pub user_info_url: String,
    /// Fixed local callback port. Part of the registered redirect URI.
    pub callback_port: u16,
    /// OAuth scopes requested on login.
    pub scopes: Vec<String>,
    /// Cloud Code API hosts in priority order.
    pub endpoints: Vec<String>,
    /// Project id used when no endpoint reports one.
    pub default_project_id: String,
    /// Per-attempt timeout for endpoint requests.
    pub request_timeout: Duration,
    /// How long an unhealthy endpoint is skipped before it is probed again.
    pub cooldown: Duration,
    /// Consecutive failures before an endpoint is marked unhealthy.
    pub failure_threshold: u32,
    /// Overall timeout for the interactive login flow.
    pub login_timeout: Duration,
    /// Rules for classifying upstream tier ids.
    pub tier_policy: TierPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: constants::CLIENT_ID.to_string(),
            client_secret: constants::CLIENT_SECRET.to_string(),
            auth_url: constants::AUTH_URL.to_string(),
            token_url: constants::TOKEN_URL.to_string(),
            user_info_url: constants::USER_INFO_URL.to_string(),
            callback_port: constants::CALLBACK_PORT,
            scopes: constants::SCOPES.iter().map(|s| s.to_string()).collect(),
            endpoints: constants::CODE_ASSIST_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_project_id: constants::DEFAULT_PROJECT_ID.to_string(),
            request_timeout: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            failure_threshold: 3,
            login_timeout: Duration::from_secs(300),
            tier_policy: TierPolicy::default(),
        }
    }
}

impl AuthConfig {
    /// The registered redirect URI. Derived from the fixed callback port;
    /// must match the OAuth client registration exactly.
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://localhost:{}{}",
            self.callback_port,
            constants::CALLBACK_PATH
        )
    }
}

// ---------------------------------------------------------------------------
// TierPolicy
// ---------------------------------------------------------------------------

/// Rules for deciding whether an upstream tier id denotes a free tier.
///
/// The upstream schema gives no guarantees about tier-id naming, so the
/// substring rules are configuration, not protocol.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    /// Substrings that mark a tier id as free (e.g. "free", "zero").
    pub free_markers: Vec<String>,
    /// Exact tier ids treated as legacy (non-paid) tiers.
    pub legacy_ids: Vec<String>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            free_markers: vec!["free".to_string(), "zero".to_string()],
            legacy_ids: vec!["legacy-tier".to_string()],
        }
    }
}

impl TierPolicy {
    /// True if the id contains any free marker.
    pub fn has_free_marker(&self, tier_id: &str) -> bool {
        self.free_markers.iter().any(|m| tier_id.contains(m.as_str()))
    }

    /// True if the id is a legacy tier or contains a free marker.
    pub fn is_free_or_legacy(&self, tier_id: &str) -> bool {
        self.legacy_ids.iter().any(|id| id == tier_id) || self.has_free_marker(tier_id)
    }
}

// ---------------------------------------------------------------------------
// AuthSettings
// ---------------------------------------------------------------------------

/// Host-controlled settings: feature toggles and manual overrides.
///
/// The host constructs this from its own configuration surface and updates
/// the shared copy when the user edits settings. A manual API key is the
/// user explicitly opting out of the OAuth path.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Whether the OAuth path is enabled at all.
    pub oauth_enabled: bool,
    /// User-provided API key, if any.
    pub manual_api_key: Option<String>,
    /// Manually configured tier, if any.
    pub manual_tier: Option<SubscriptionTier>,
    /// Prefer the manual API key over OAuth when both are present.
    pub prefer_manual_api_key: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            oauth_enabled: true,
            manual_api_key: None,
            manual_tier: None,
            prefer_manual_api_key: false,
        }
    }
}
