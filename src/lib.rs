//! # cloudcode-auth
//!
//! Client-side OAuth credential manager for the Cloud Code (Code Assist)
//! API: PKCE login through a local callback listener, lazy token refresh,
//! endpoint failover with health tracking, multi-account rotation, and
//! subscription-tier resolution.
//!
//! The crate never touches the host environment directly. It consumes two
//! injected capabilities — secret storage and "open a URL in the browser"
//! — plus a small settings value, which keeps every component testable
//! with in-memory fakes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//! use cloudcode_auth::{
//!     AuthConfig, AuthSettings, CredentialStore, MemorySecretStore,
//!     SubscriptionResolver,
//! };
//!
//! # async fn example(opener: Arc<dyn cloudcode_auth::UrlOpener>) -> cloudcode_auth::Result<()> {
//! let settings = Arc::new(RwLock::new(AuthSettings::default()));
//! let secrets = Arc::new(MemorySecretStore::new());
//! let store = Arc::new(CredentialStore::new(
//!     AuthConfig::default(),
//!     settings.clone(),
//!     secrets,
//!     opener,
//! ));
//!
//! if !store.is_authenticated().await {
//!     let outcome = store.prompt_login().await?;
//!     println!("Logged in as {} ({})", outcome.email, outcome.tier);
//! }
//!
//! // Auto-refreshes when the token is near expiry.
//! let token = store.get_access_token().await?;
//!
//! let subscriptions = SubscriptionResolver::new(settings, store.clone());
//! let info = subscriptions.get_subscription().await;
//! println!("Effective tier: {}", info.tier);
//! # let _ = token;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `system-keyring`: secret storage backed by the OS keyring
//!   (macOS Keychain, Linux Secret Service, Windows Credential Manager)

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod fallback;
pub mod host;
pub mod oauth;
pub mod rotation;
pub mod store;
pub mod subscription;
pub mod tier;
pub mod token;

// Re-exports for ergonomic usage
pub use config::{AuthConfig, AuthSettings, TierPolicy};
pub use error::{Error, Result};
pub use fallback::{EndpointStatus, FallbackClient, FallbackRequest};
pub use host::{MemorySecretStore, SecretStore, UrlOpener};
pub use oauth::{
    build_authorization_url, AuthState, AuthorizationRequest, CallbackListener, CallbackOutcome,
    PkcePair, RefreshedToken, TokenExchange, TokenExchanger,
};
pub use rotation::{AccountRecord, AccountRotator, AccountSummary, RotationReason};
pub use store::{AuthMethod, AuthStatus, CredentialStore, LoginOutcome};
pub use subscription::{
    subscription_for, AuthStatusSource, RateLimits, SubscriptionInfo, SubscriptionResolver,
    SubscriptionTier,
};
pub use tier::{fetch_account_info, AccountInfo, AccountTier};
pub use token::TokenRecord;

#[cfg(feature = "system-keyring")]
pub use host::KeyringSecretStore;
