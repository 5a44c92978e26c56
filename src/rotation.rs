//! Multi-account rotation.
//!
//! Holds an ordered list of linked accounts plus a cursor at the active
//! one, and rotates on rate-limit or error signals so request volume can
//! spread across identities. The rotator owns the account list and its
//! persistence exclusively; callers get copies of records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::SecretStore;
use crate::oauth::TokenExchanger;
use crate::token::now_ms;

/// Secret-storage key for the serialized account list.
const ACCOUNTS_SECRET_KEY: &str = "cloudcode-auth.accounts";

/// Why the caller wants a different account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// The active account hit a rate limit; mark it unhealthy before
    /// moving on.
    RateLimit,
    /// Some other failure; rotate without penalizing the active account.
    Error,
}

/// One linked account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Stable account id.
    pub id: String,
    /// Account email.
    pub email: String,
    /// Current access token.
    pub access_token: String,
    /// Refresh token for this account.
    pub refresh_token: String,
    /// Epoch milliseconds at which the access token expires.
    pub expires_at: i64,
    /// Cleared when the account is rate limited; restored by
    /// [`AccountRotator::mark_account_healthy`].
    pub is_healthy: bool,
    /// Epoch milliseconds of the last time this account was selected.
    pub last_used: i64,
}

impl AccountRecord {
    /// True once the access token is past its expiry.
    pub fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at
    }
}

/// Summary row for display.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    /// Account email.
    pub email: String,
    /// Current health flag.
    pub is_healthy: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RotatorState {
    accounts: Vec<AccountRecord>,
    current: usize,
}

/// Ordered account list with a cursor at the active account.
pub struct AccountRotator {
    secrets: Arc<dyn SecretStore>,
    exchanger: TokenExchanger,
    state: Mutex<RotatorState>,
}

impl AccountRotator {
    /// Create an empty rotator. Call [`load`](Self::load) to restore the
    /// persisted account list.
    pub fn new(secrets: Arc<dyn SecretStore>, exchanger: TokenExchanger) -> Self {
        Self {
            secrets,
            exchanger,
            state: Mutex::new(RotatorState::default()),
        }
    }

    /// Restore the account list from secret storage. Missing or corrupt
    /// state starts empty.
    pub async fn load(&self) -> Result<()> {
        let Some(serialized) = self.secrets.get(ACCOUNTS_SECRET_KEY).await? else {
            return Ok(());
        };
        match serde_json::from_str::<RotatorState>(&serialized) {
            Ok(mut loaded) => {
                if loaded.current >= loaded.accounts.len() {
                    loaded.current = 0;
                }
                *self.state.lock().await = loaded;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Corrupt account list in storage, starting empty");
                Ok(())
            }
        }
    }

    /// Link a new account. Returns the generated account id.
    pub async fn add_account(
        &self,
        email: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
    ) -> Result<String> {
        let record = AccountRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at,
            is_healthy: true,
            last_used: now_ms(),
        };
        let id = record.id.clone();

        let mut state = self.state.lock().await;
        state.accounts.push(record);
        let count = state.accounts.len();
        self.persist(&state).await?;
        info!(%email, count, "Linked account");
        Ok(id)
    }

    /// Unlink an account by email. The cursor is clamped into range.
    pub async fn remove_account(&self, email: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.accounts.retain(|a| a.email != email);
        if state.current >= state.accounts.len() {
            state.current = state.accounts.len().saturating_sub(1);
        }
        self.persist(&state).await?;
        info!(%email, "Unlinked account");
        Ok(())
    }

    /// The account the cursor points at, if any.
    pub async fn active_account(&self) -> Option<AccountRecord> {
        let state = self.state.lock().await;
        state.accounts.get(state.current).cloned()
    }

    /// Number of linked accounts.
    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    /// Summary of every linked account, in list order.
    pub async fn accounts(&self) -> Vec<AccountSummary> {
        self.state
            .lock()
            .await
            .accounts
            .iter()
            .map(|a| AccountSummary {
                email: a.email.clone(),
                is_healthy: a.is_healthy,
            })
            .collect()
    }

    /// Advance to the next healthy, unexpired account.
    ///
    /// On [`RotationReason::RateLimit`] the *currently active* account is
    /// marked unhealthy first. The walk starts after the cursor and wraps
    /// the list exactly once; if nothing qualifies the rotation fails with
    /// [`Error::NoAccountAvailable`] and the caller must surface that —
    /// retrying in a loop cannot succeed until an account recovers.
    pub async fn rotate_account(&self, reason: RotationReason) -> Result<AccountRecord> {
        let mut state = self.state.lock().await;
        if state.accounts.is_empty() {
            return Err(Error::NoAccountAvailable);
        }

        if reason == RotationReason::RateLimit {
            let current = state.current;
            state.accounts[current].is_healthy = false;
            debug!(
                email = %state.accounts[current].email,
                "Active account marked unhealthy (rate limited)"
            );
        }

        let len = state.accounts.len();
        let start = state.current;
        for step in 1..=len {
            let idx = (start + step) % len;
            let candidate = &state.accounts[idx];
            if candidate.is_healthy && !candidate.is_expired() {
                state.current = idx;
                state.accounts[idx].last_used = now_ms();
                let selected = state.accounts[idx].clone();
                self.persist(&state).await?;
                info!(email = %selected.email, "Rotated to account");
                return Ok(selected);
            }
        }

        warn!("All accounts are rate limited or expired");
        Err(Error::NoAccountAvailable)
    }

    /// Convenience wrapper for a 429 from upstream.
    pub async fn handle_rate_limit(&self) -> Result<AccountRecord> {
        debug!("Rate limit detected, rotating account");
        self.rotate_account(RotationReason::RateLimit).await
    }

    /// Restore the active account's health flag (after a successful call).
    pub async fn mark_account_healthy(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.current;
        if let Some(account) = state.accounts.get_mut(current) {
            account.is_healthy = true;
            self.persist(&state).await?;
        }
        Ok(())
    }

    /// Refresh the access token of one account through the token endpoint.
    ///
    /// A rejected refresh marks the account unhealthy and propagates the
    /// error; rotation will then skip it.
    pub async fn refresh_account(&self, id: &str) -> Result<()> {
        let refresh_token = {
            let state = self.state.lock().await;
            state
                .accounts
                .iter()
                .find(|a| a.id == id)
                .map(|a| a.refresh_token.clone())
                .ok_or(Error::NoAccountAvailable)?
        };

        match self.exchanger.refresh_access_token(&refresh_token).await {
            Ok(refreshed) => {
                let mut state = self.state.lock().await;
                if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
                    account.access_token = refreshed.access_token.clone();
                    account.expires_at = now_ms() + refreshed.expires_in * 1000;
                    if let Some(new_refresh) = &refreshed.refresh_token {
                        account.refresh_token = new_refresh.clone();
                    }
                    account.is_healthy = true;
                }
                self.persist(&state).await?;
                Ok(())
            }
            Err(e @ Error::RefreshFailed(_)) => {
                let mut state = self.state.lock().await;
                if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
                    warn!(email = %account.email, "Account refresh rejected, marking unhealthy");
                    account.is_healthy = false;
                }
                self.persist(&state).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, state: &RotatorState) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        self.secrets.set(ACCOUNTS_SECRET_KEY, &serialized).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::host::MemorySecretStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rotator(secrets: MemorySecretStore) -> AccountRotator {
        let config = Arc::new(AuthConfig::default());
        AccountRotator::new(Arc::new(secrets), TokenExchanger::new(config))
    }

    fn rotator_with_token_url(secrets: MemorySecretStore, token_url: String) -> AccountRotator {
        let config = Arc::new(AuthConfig {
            token_url,
            ..AuthConfig::default()
        });
        AccountRotator::new(Arc::new(secrets), TokenExchanger::new(config))
    }

    async fn add_three(rotator: &AccountRotator) {
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            rotator
                .add_account(email, "access", "refresh", now_ms() + 3_600_000)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_rotator() {
        let rotator = rotator(MemorySecretStore::new());
        assert_eq!(rotator.account_count().await, 0);
        assert!(rotator.active_account().await.is_none());
        assert!(matches!(
            rotator.rotate_account(RotationReason::RateLimit).await,
            Err(Error::NoAccountAvailable)
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_rotation_skips_marked_account() {
        let rotator = rotator(MemorySecretStore::new());
        add_three(&rotator).await;

        // Cursor starts at the first account.
        assert_eq!(rotator.active_account().await.unwrap().email, "a@example.com");

        let next = rotator
            .rotate_account(RotationReason::RateLimit)
            .await
            .unwrap();
        assert_eq!(next.email, "b@example.com");

        // The rate-limited account was the one left behind, not the target.
        let summaries = rotator.accounts().await;
        assert!(!summaries[0].is_healthy);
        assert!(summaries[1].is_healthy);
        assert!(summaries[2].is_healthy);
    }

    #[tokio::test]
    async fn test_error_rotation_does_not_penalize() {
        let rotator = rotator(MemorySecretStore::new());
        add_three(&rotator).await;

        rotator.rotate_account(RotationReason::Error).await.unwrap();
        assert!(rotator.accounts().await.iter().all(|a| a.is_healthy));
    }

    #[tokio::test]
    async fn test_rotation_skips_expired_accounts() {
        let rotator = rotator(MemorySecretStore::new());
        rotator
            .add_account("a@example.com", "t", "r", now_ms() + 3_600_000)
            .await
            .unwrap();
        rotator
            .add_account("expired@example.com", "t", "r", now_ms() - 1)
            .await
            .unwrap();
        rotator
            .add_account("c@example.com", "t", "r", now_ms() + 3_600_000)
            .await
            .unwrap();

        let next = rotator
            .rotate_account(RotationReason::RateLimit)
            .await
            .unwrap();
        assert_eq!(next.email, "c@example.com");
    }

    #[tokio::test]
    async fn test_all_exhausted_returns_none_available() {
        let rotator = rotator(MemorySecretStore::new());
        add_three(&rotator).await;

        // Burn through every account.
        rotator.rotate_account(RotationReason::RateLimit).await.unwrap();
        rotator.rotate_account(RotationReason::RateLimit).await.unwrap();
        let err = rotator
            .rotate_account(RotationReason::RateLimit)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAccountAvailable));
    }

    #[tokio::test]
    async fn test_single_account_rate_limited() {
        let rotator = rotator(MemorySecretStore::new());
        rotator
            .add_account("only@example.com", "t", "r", now_ms() + 3_600_000)
            .await
            .unwrap();

        // The wrap visits the account itself, but it was just marked.
        assert!(matches!(
            rotator.rotate_account(RotationReason::RateLimit).await,
            Err(Error::NoAccountAvailable)
        ));

        // An error rotation may come back to it.
        let again = rotator.rotate_account(RotationReason::Error).await;
        assert!(matches!(again, Err(Error::NoAccountAvailable)));

        rotator.mark_account_healthy().await.unwrap();
        let back = rotator.rotate_account(RotationReason::Error).await.unwrap();
        assert_eq!(back.email, "only@example.com");
    }

    #[tokio::test]
    async fn test_mark_account_healthy_restores_active() {
        let rotator = rotator(MemorySecretStore::new());
        add_three(&rotator).await;

        rotator.rotate_account(RotationReason::RateLimit).await.unwrap();
        assert!(!rotator.accounts().await[0].is_healthy);

        // Walk the cursor back around to the first account.
        rotator.rotate_account(RotationReason::Error).await.unwrap(); // -> c
        let state_emails: Vec<_> = rotator.accounts().await;
        assert_eq!(state_emails.len(), 3);

        // b -> c -> a is skipped while unhealthy; rotate from c goes to b.
        let next = rotator.rotate_account(RotationReason::Error).await.unwrap();
        assert_eq!(next.email, "b@example.com");
    }

    #[tokio::test]
    async fn test_rotation_updates_last_used_and_persists() {
        let secrets = MemorySecretStore::new();
        let rotator = rotator(secrets.clone());
        add_three(&rotator).await;

        let before = rotator.active_account().await.unwrap().last_used;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let next = rotator
            .rotate_account(RotationReason::RateLimit)
            .await
            .unwrap();
        assert!(next.last_used >= before);

        // A fresh rotator restores the persisted cursor and health flags.
        let restored = rotator_with_token_url(secrets, "http://unused".into());
        restored.load().await.unwrap();
        assert_eq!(restored.active_account().await.unwrap().email, "b@example.com");
        assert!(!restored.accounts().await[0].is_healthy);
    }

    #[tokio::test]
    async fn test_remove_account_clamps_cursor() {
        let rotator = rotator(MemorySecretStore::new());
        add_three(&rotator).await;

        // Move the cursor to the last account.
        rotator.rotate_account(RotationReason::Error).await.unwrap();
        rotator.rotate_account(RotationReason::Error).await.unwrap();
        assert_eq!(rotator.active_account().await.unwrap().email, "c@example.com");

        rotator.remove_account("c@example.com").await.unwrap();
        assert_eq!(rotator.account_count().await, 2);
        // Cursor clamped to the new last entry.
        assert_eq!(rotator.active_account().await.unwrap().email, "b@example.com");

        rotator.remove_account("a@example.com").await.unwrap();
        rotator.remove_account("b@example.com").await.unwrap();
        assert!(rotator.active_account().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_account_applies_new_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "rotated-access",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let rotator = rotator_with_token_url(
            MemorySecretStore::new(),
            format!("{}/token", server.uri()),
        );
        let id = rotator
            .add_account("a@example.com", "old-access", "refresh-a", now_ms() - 1)
            .await
            .unwrap();

        rotator.refresh_account(&id).await.unwrap();
        let account = rotator.active_account().await.unwrap();
        assert_eq!(account.access_token, "rotated-access");
        assert_eq!(account.refresh_token, "refresh-a");
        assert!(!account.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_rejection_marks_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let rotator = rotator_with_token_url(
            MemorySecretStore::new(),
            format!("{}/token", server.uri()),
        );
        let id = rotator
            .add_account("a@example.com", "t", "r", now_ms() + 3_600_000)
            .await
            .unwrap();

        let err = rotator.refresh_account(&id).await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed(_)));
        assert!(!rotator.accounts().await[0].is_healthy);
    }

    #[tokio::test]
    async fn test_handle_rate_limit_rotates() {
        let rotator = rotator(MemorySecretStore::new());
        add_three(&rotator).await;

        let next = rotator.handle_rate_limit().await.unwrap();
        assert_eq!(next.email, "b@example.com");
    }
}
