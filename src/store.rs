//! Credential store: token persistence, lazy refresh, and the interactive
//! login sequence.
//!
//! The store owns the persisted [`TokenRecord`] exclusively. Reads go
//! through a short-lived in-memory cache; the access token is refreshed
//! lazily when a read finds it within the safety margin of expiry — never
//! by a background timer, so accounts that are not in use are not
//! refreshed. Callers receive copies of the record and never mutate the
//! store's state directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::{AuthConfig, AuthSettings};
use crate::error::{Error, Result};
use crate::fallback::FallbackClient;
use crate::host::{SecretStore, UrlOpener};
use crate::oauth::{build_authorization_url, CallbackListener, CallbackOutcome, TokenExchanger};
use crate::subscription::AuthStatusSource;
use crate::tier::AccountTier;
use crate::token::TokenRecord;

/// Secret-storage key for the serialized token record.
const TOKEN_SECRET_KEY: &str = "cloudcode-auth.token";

/// TTL for the in-memory record cache.
const RECORD_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// How the session is authenticated, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// A manually configured API key.
    ApiKey,
    /// A stored OAuth credential.
    Oauth,
    /// Not authenticated.
    None,
}

/// Read-only authentication summary.
///
/// A manually configured API key takes priority over OAuth state: a user
/// providing their own key has explicitly opted out of the OAuth path.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    /// Whether any credential is available.
    pub authenticated: bool,
    /// Which kind of credential.
    pub method: AuthMethod,
    /// The OAuth account email, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// What a completed login resolved to.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Account email (empty if the userinfo lookup failed).
    pub email: String,
    /// Resolved project id.
    pub project_id: String,
    /// Detected entitlement tier.
    pub tier: AccountTier,
}

/// Owns the persisted token record and runs the login flow.
pub struct CredentialStore {
    config: Arc<AuthConfig>,
    settings: Arc<RwLock<AuthSettings>>,
    secrets: Arc<dyn SecretStore>,
    opener: Arc<dyn UrlOpener>,
    exchanger: TokenExchanger,
    fallback: Arc<FallbackClient>,
    cache: Mutex<TtlCache<TokenRecord>>,
    // Held across the whole interactive flow; try_lock makes a second
    // concurrent login fail fast instead of fighting over the fixed port.
    login_lock: Mutex<()>,
}

impl CredentialStore {
    /// Create a store over the injected host collaborators.
    pub fn new(
        config: AuthConfig,
        settings: Arc<RwLock<AuthSettings>>,
        secrets: Arc<dyn SecretStore>,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        let config = Arc::new(config);
        let fallback = Arc::new(FallbackClient::from_config(&config));
        let exchanger = TokenExchanger::new(config.clone());
        Self {
            config,
            settings,
            secrets,
            opener,
            exchanger,
            fallback,
            cache: Mutex::new(TtlCache::new(RECORD_CACHE_TTL)),
            login_lock: Mutex::new(()),
        }
    }

    /// The fallback client used for Cloud Code API calls. Shared so the
    /// host can route its own requests through the same health tracking.
    pub fn fallback(&self) -> Arc<FallbackClient> {
        self.fallback.clone()
    }

    /// The static configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // =========================================================================
    // Token reads
    // =========================================================================

    /// Get a valid access token, refreshing it first when it is within the
    /// safety margin of expiry.
    ///
    /// A rejected refresh clears all stored credentials and reports
    /// [`Error::NotAuthenticated`]; transient network failures leave the
    /// stored state untouched.
    pub async fn get_access_token(&self) -> Result<String> {
        if !self.settings.read().await.oauth_enabled {
            return Err(Error::OauthDisabled);
        }

        let mut record = self
            .load_record()
            .await?
            .ok_or(Error::NotAuthenticated)?;

        if !record.needs_refresh() {
            return Ok(record.access_token);
        }

        debug!("Access token near expiry, refreshing");
        match self
            .exchanger
            .refresh_access_token(&record.refresh_token)
            .await
        {
            Ok(refreshed) => {
                record.apply_refresh(&refreshed);
                self.persist_record(&record).await?;
                Ok(record.access_token)
            }
            Err(e @ Error::RefreshFailed(_)) => {
                warn!(error = %e, "Refresh rejected, clearing stored credentials");
                self.clear_credentials().await?;
                Err(Error::NotAuthenticated)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a stored OAuth credential exists. Does not verify the token
    /// with the provider; use [`get_access_token`](Self::get_access_token)
    /// for that.
    pub async fn is_authenticated(&self) -> bool {
        if !self.settings.read().await.oauth_enabled {
            return false;
        }
        matches!(self.load_record().await, Ok(Some(_)))
    }

    /// The authenticated account's email, when known.
    pub async fn user_email(&self) -> Option<String> {
        let record = self.load_record().await.ok().flatten()?;
        (!record.email.is_empty()).then_some(record.email)
    }

    /// The tier detected at login/refresh time.
    pub async fn detected_tier(&self) -> Option<AccountTier> {
        Some(self.load_record().await.ok().flatten()?.tier)
    }

    /// The resolved project id.
    pub async fn project_id(&self) -> Option<String> {
        let record = self.load_record().await.ok().flatten()?;
        (!record.project_id.is_empty()).then_some(record.project_id)
    }

    /// Read-only composite status. A manual API key wins over OAuth.
    pub async fn get_auth_status(&self) -> AuthStatus {
        if self.settings.read().await.manual_api_key.is_some() {
            return AuthStatus {
                authenticated: true,
                method: AuthMethod::ApiKey,
                email: None,
            };
        }

        if let Ok(Some(record)) = self.load_record().await {
            if self.settings.read().await.oauth_enabled {
                return AuthStatus {
                    authenticated: true,
                    method: AuthMethod::Oauth,
                    email: (!record.email.is_empty()).then_some(record.email),
                };
            }
        }

        AuthStatus {
            authenticated: false,
            method: AuthMethod::None,
            email: None,
        }
    }

    // =========================================================================
    // Login flow
    // =========================================================================

    /// Run the interactive login: callback listener, browser, code
    /// exchange, persistence.
    pub async fn prompt_login(&self) -> Result<LoginOutcome> {
        self.login_with_project(None).await
    }

    /// Like [`prompt_login`](Self::prompt_login) with a project hint that
    /// rides through the OAuth state parameter.
    pub async fn login_with_project(&self, project_hint: Option<&str>) -> Result<LoginOutcome> {
        if !self.settings.read().await.oauth_enabled {
            return Err(Error::OauthDisabled);
        }

        // One login at a time per process: the callback port is fixed.
        let _guard = self
            .login_lock
            .try_lock()
            .map_err(|_| Error::LoginInProgress)?;

        let mut listener = CallbackListener::bind(self.config.callback_port).await?;
        let result = self.run_login(&mut listener, project_hint).await;
        // Unconditional on every exit path; a bound listener must never
        // leak across calls.
        listener.shutdown();
        result
    }

    async fn run_login(
        &self,
        listener: &mut CallbackListener,
        project_hint: Option<&str>,
    ) -> Result<LoginOutcome> {
        let auth = build_authorization_url(&self.config, project_hint);
        self.opener.open(&auth.url)?;
        debug!("Waiting for OAuth redirect");

        let outcome = tokio::time::timeout(self.config.login_timeout, listener.recv())
            .await
            .map_err(|_| Error::LoginTimeout)??;

        let (code, callback_state) = match outcome {
            CallbackOutcome::Code { code, state } => (code, state),
            CallbackOutcome::Denied { error } => return Err(Error::CallbackDenied(error)),
        };

        let exchange = self
            .exchanger
            .exchange_code(&self.fallback, &code, &callback_state, &auth.verifier)
            .await?;

        let record = TokenRecord::from_exchange(&exchange);
        self.persist_record(&record).await?;

        info!(email = %record.email, tier = %record.tier, "Login complete");
        Ok(LoginOutcome {
            email: record.email,
            project_id: record.project_id,
            tier: record.tier,
        })
    }

    /// Remove the stored credential and drop the cache.
    pub async fn logout(&self) -> Result<()> {
        self.clear_credentials().await?;
        info!("Logged out");
        Ok(())
    }

    /// Drop the in-memory cache; the next read hits secret storage.
    pub async fn invalidate_cache(&self) {
        self.cache.lock().await.invalidate();
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn load_record(&self) -> Result<Option<TokenRecord>> {
        if let Some(record) = self.cache.lock().await.get() {
            return Ok(Some(record));
        }

        let Some(serialized) = self.secrets.get(TOKEN_SECRET_KEY).await? else {
            return Ok(None);
        };
        let record: TokenRecord = serde_json::from_str(&serialized)
            .map_err(|e| Error::Storage(format!("corrupt token record: {}", e)))?;

        self.cache.lock().await.set(record.clone());
        Ok(Some(record))
    }

    async fn persist_record(&self, record: &TokenRecord) -> Result<()> {
        let serialized = serde_json::to_string(record)?;
        self.secrets.set(TOKEN_SECRET_KEY, &serialized).await?;
        self.cache.lock().await.set(record.clone());
        Ok(())
    }

    async fn clear_credentials(&self) -> Result<()> {
        self.secrets.delete(TOKEN_SECRET_KEY).await?;
        self.cache.lock().await.invalidate();
        Ok(())
    }
}

#[async_trait]
impl AuthStatusSource for CredentialStore {
    async fn is_authenticated(&self) -> bool {
        CredentialStore::is_authenticated(self).await
    }
}
