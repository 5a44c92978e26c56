//! Fixed OAuth client credentials and Cloud Code API endpoints.
//!
//! The client id/secret are the public desktop-client credentials baked into
//! the registered OAuth application; the redirect URI (and therefore the
//! callback port) is part of that registration and cannot vary at runtime.

/// OAuth client id registered for the desktop integration.
pub const CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";

/// OAuth client secret (public for installed applications).
pub const CLIENT_SECRET: &str = "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";

/// Fixed local callback port. Chosen to avoid collision with sibling tools
/// that also run localhost OAuth listeners.
pub const CALLBACK_PORT: u16 = 36743;

/// Path component of the registered redirect URI.
pub const CALLBACK_PATH: &str = "/oauth-callback";

/// Google authorization endpoint.
pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google token endpoint.
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google userinfo endpoint, used for the best-effort email lookup.
pub const USER_INFO_URL: &str = "https://www.googleapis.com/oauth2/v1/userinfo?alt=json";

/// OAuth scopes requested on login.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/cclog",
    "https://www.googleapis.com/auth/experimentsandconfigs",
];

/// Cloud Code API hosts in priority order: pre-prod hosts first, production
/// last. The fallback layer walks this list sequentially.
pub const CODE_ASSIST_ENDPOINTS: &[&str] = &[
    "https://daily-cloudcode-pa.sandbox.googleapis.com",
    "https://autopush-cloudcode-pa.sandbox.googleapis.com",
    "https://cloudcode-pa.googleapis.com",
];

/// RPC used to resolve the caller's project and entitlement tier.
pub const LOAD_ASSIST_PATH: &str = "/v1internal:loadCodeAssist";

/// Project id used when no endpoint reports one for the account.
pub const DEFAULT_PROJECT_ID: &str = "rising-fact-p41fc";

/// Client metadata sent in the `loadCodeAssist` request body.
pub const IDE_TYPE: &str = "IDE_UNSPECIFIED";
/// See [`IDE_TYPE`].
pub const PLATFORM: &str = "PLATFORM_UNSPECIFIED";
/// See [`IDE_TYPE`].
pub const PLUGIN_TYPE: &str = "GEMINI";

/// Extra request headers the Cloud Code API expects.
pub fn api_headers() -> Vec<(String, String)> {
    vec![
        (
            "User-Agent".to_string(),
            "antigravity/1.11.5 windows/amd64".to_string(),
        ),
        (
            "X-Goog-Api-Client".to_string(),
            "google-cloud-sdk vscode_cloudshelleditor/0.1".to_string(),
        ),
        (
            "Client-Metadata".to_string(),
            format!(
                r#"{{"ideType":"{IDE_TYPE}","platform":"{PLATFORM}","pluginType":"{PLUGIN_TYPE}"}}"#
            ),
        ),
    ]
}
