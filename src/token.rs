//! Persisted token record and expiry semantics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::oauth::exchange::{RefreshedToken, TokenExchange};
use crate::tier::AccountTier;

/// Refresh is triggered when the token is within this margin of expiry.
/// A safety margin, not an exact boundary.
const REFRESH_MARGIN_MS: i64 = 5 * 60 * 1000;

/// The credential record persisted under the token secret-storage key.
///
/// Created on a successful code exchange. `access_token`/`expires_at` are
/// replaced in place on refresh; `refresh_token` is rotated only when the
/// provider returns a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The OAuth access token for API requests.
    pub access_token: String,
    /// The long-lived refresh token.
    pub refresh_token: String,
    /// Epoch milliseconds at which the access token expires.
    pub expires_at: i64,
    /// The account's email, empty if the userinfo lookup failed.
    #[serde(default)]
    pub email: String,
    /// The resolved project id.
    #[serde(default)]
    pub project_id: String,
    /// The detected entitlement tier.
    #[serde(default)]
    pub tier: AccountTier,
}

impl TokenRecord {
    /// Build a record from a completed code exchange.
    pub fn from_exchange(exchange: &TokenExchange) -> Self {
        Self {
            access_token: exchange.access_token.clone(),
            refresh_token: exchange.refresh_token.clone(),
            expires_at: now_ms() + exchange.expires_in * 1000,
            email: exchange.email.clone(),
            project_id: exchange.project_id.clone(),
            tier: exchange.tier,
        }
    }

    /// True once the access token is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at
    }

    /// True when the token is expired or within the refresh safety margin.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        now_ms() >= self.expires_at - REFRESH_MARGIN_MS
    }

    /// Time left before expiry, zero if already expired.
    pub fn time_until_expiry(&self) -> Duration {
        let remaining = self.expires_at - now_ms();
        if remaining > 0 {
            Duration::from_millis(remaining as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Apply a refresh result: new access token and expiry, refresh token
    /// rotated only if the provider sent a replacement.
    pub fn apply_refresh(&mut self, refreshed: &RefreshedToken) {
        self.access_token = refreshed.access_token.clone();
        self.expires_at = now_ms() + refreshed.expires_in * 1000;
        if let Some(new_refresh) = &refreshed.refresh_token {
            self.refresh_token = new_refresh.clone();
        }
    }
}

/// Current time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: i64) -> TokenRecord {
        TokenRecord {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at,
            email: "user@example.com".into(),
            project_id: "proj-1".into(),
            tier: AccountTier::Free,
        }
    }

    #[test]
    fn test_expired_record() {
        let rec = record(now_ms() - 1);
        assert!(rec.is_expired());
        assert!(rec.needs_refresh());
        assert_eq!(rec.time_until_expiry(), Duration::ZERO);
    }

    #[test]
    fn test_fresh_record() {
        let rec = record(now_ms() + 10 * 60 * 1000);
        assert!(!rec.is_expired());
        assert!(!rec.needs_refresh());
        assert!(rec.time_until_expiry() > Duration::from_secs(9 * 60));
    }

    #[test]
    fn test_needs_refresh_within_margin() {
        // Unexpired but inside the 5-minute margin.
        let rec = record(now_ms() + 2 * 60 * 1000);
        assert!(!rec.is_expired());
        assert!(rec.needs_refresh());
    }

    #[test]
    fn test_apply_refresh_keeps_old_refresh_token() {
        let mut rec = record(now_ms() - 1);
        rec.apply_refresh(&RefreshedToken {
            access_token: "new-access".into(),
            expires_in: 3600,
            refresh_token: None,
        });
        assert_eq!(rec.access_token, "new-access");
        assert_eq!(rec.refresh_token, "refresh");
        assert!(!rec.needs_refresh());
    }

    #[test]
    fn test_apply_refresh_rotates_when_provided() {
        let mut rec = record(now_ms() - 1);
        rec.apply_refresh(&RefreshedToken {
            access_token: "new-access".into(),
            expires_in: 3600,
            refresh_token: Some("new-refresh".into()),
        });
        assert_eq!(rec.refresh_token, "new-refresh");
    }

    #[test]
    fn test_apply_refresh_preserves_identity_fields() {
        let mut rec = record(now_ms() - 1);
        rec.apply_refresh(&RefreshedToken {
            access_token: "new-access".into(),
            expires_in: 3600,
            refresh_token: None,
        });
        assert_eq!(rec.email, "user@example.com");
        assert_eq!(rec.project_id, "proj-1");
        assert_eq!(rec.tier, AccountTier::Free);
    }

    #[test]
    fn test_serde_roundtrip() {
        let rec = record(1_700_000_000_000);
        let json = serde_json::to_string(&rec).unwrap();
        let restored: TokenRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, restored);
    }
}
