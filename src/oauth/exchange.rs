//! Token exchange and refresh against the provider token endpoint.
//!
//! Stateless beyond the HTTP calls it makes. The exchange validates the
//! callback `state` against the verifier of the originating login attempt
//! before anything goes over the wire; a mismatch is treated as tampering
//! and fails closed.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::fallback::FallbackClient;
use crate::oauth::state::AuthState;
use crate::tier::{self, AccountTier};

/// Fallback expiry when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Result of a successful authorization-code exchange.
#[derive(Debug, Clone)]
pub struct TokenExchange {
    /// The access token.
    pub access_token: String,
    /// The refresh token.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Account email; empty if the userinfo lookup failed.
    pub email: String,
    /// Resolved project id (state hint wins over detection).
    pub project_id: String,
    /// Detected entitlement tier.
    pub tier: AccountTier,
}

/// Result of a successful refresh grant.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    /// The new access token.
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// A replacement refresh token, if the provider rotated it.
    /// Providers routinely omit this; the caller keeps the prior value.
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

/// Client for the provider's token and userinfo endpoints.
pub struct TokenExchanger {
    config: Arc<AuthConfig>,
    client: reqwest::Client,
}

impl TokenExchanger {
    /// Create an exchanger for the given configuration.
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Replace the HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `expected_verifier` is the PKCE verifier of the login attempt that
    /// produced the authorization URL. The verifier recovered from `state`
    /// must match it exactly; otherwise the exchange is rejected before any
    /// network call is made.
    ///
    /// On success the user's email is fetched best-effort (a failure leaves
    /// it empty) and the project/tier are resolved through `fallback`.
    #[instrument(skip_all, fields(token_url = %self.config.token_url))]
    pub async fn exchange_code(
        &self,
        fallback: &FallbackClient,
        code: &str,
        state: &str,
        expected_verifier: &str,
    ) -> Result<TokenExchange> {
        let auth_state = AuthState::decode(state)?;
        if auth_state.verifier != expected_verifier {
            warn!("Callback state verifier does not match this login attempt");
            return Err(Error::StateMismatch);
        }

        debug!("Exchanging authorization code for tokens");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", &self.config.redirect_uri()),
                ("code_verifier", &auth_state.verifier),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::ExchangeFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            Error::ExchangeFailed(format!("failed to parse token response: {}", e))
        })?;

        let refresh_token = token.refresh_token.ok_or_else(|| {
            Error::ExchangeFailed(
                "no refresh token in response - ensure access_type=offline and prompt=consent"
                    .to_string(),
            )
        })?;

        let email = self.fetch_email(&token.access_token).await;
        let account = tier::fetch_account_info(fallback, &self.config, &token.access_token).await;

        debug!(tier = %account.tier, "Token exchange successful");

        Ok(TokenExchange {
            access_token: token.access_token,
            refresh_token,
            expires_in: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            email,
            project_id: auth_state
                .project_id
                .filter(|p| !p.is_empty())
                .unwrap_or(account.project_id),
            tier: account.tier,
        })
    }

    /// Refresh an access token.
    ///
    /// A rejected refresh means the stored credential is invalid; the error
    /// carries the provider's raw response and the caller is expected to
    /// clear stored tokens rather than retry.
    #[instrument(skip_all, fields(token_url = %self.config.token_url))]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken> {
        debug!("Refreshing access token");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token refresh rejected");
            return Err(Error::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::RefreshFailed(format!("failed to parse refresh response: {}", e)))?;

        debug!("Token refresh successful");

        Ok(RefreshedToken {
            access_token: token.access_token,
            expires_in: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            refresh_token: token.refresh_token,
        })
    }

    /// Best-effort email lookup. Never fails the exchange.
    async fn fetch_email(&self, access_token: &str) -> String {
        let result = self
            .client
            .get(&self.config.user_info_url)
            .bearer_auth(access_token)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<UserInfo>().await {
                    Ok(info) => info.email.unwrap_or_default(),
                    Err(e) => {
                        warn!(error = %e, "Failed to parse userinfo response");
                        String::new()
                    }
                }
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "Userinfo request failed");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch user email");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        server: MockServer,
        exchanger: TokenExchanger,
        fallback: FallbackClient,
    }

    async fn fixture() -> Fixture {
        let server = MockServer::start().await;
        let config = Arc::new(AuthConfig {
            token_url: format!("{}/token", server.uri()),
            user_info_url: format!("{}/userinfo", server.uri()),
            endpoints: vec![server.uri()],
            ..AuthConfig::default()
        });
        let fallback = FallbackClient::new(
            config.endpoints.clone(),
            Duration::from_secs(5),
            Duration::from_secs(60),
            3,
        );
        let exchanger = TokenExchanger::new(config);
        Fixture {
            server,
            exchanger,
            fallback,
        }
    }

    async fn mount_token_ok(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
    }

    async fn mount_userinfo(server: &MockServer, email: &str) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": email})))
            .mount(server)
            .await;
    }

    async fn mount_assist(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn encoded_state(verifier: &str, project: Option<&str>) -> String {
        AuthState {
            verifier: verifier.to_string(),
            project_id: project.map(|s| s.to_string()),
        }
        .encode()
    }

    #[tokio::test]
    async fn test_exchange_sends_verifier_from_state() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code_verifier=v1"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 1800,
            })))
            .mount(&f.server)
            .await;
        mount_userinfo(&f.server, "user@example.com").await;
        mount_assist(
            &f.server,
            json!({"cloudaicompanionProject": "proj-1", "paidTier": {"id": "g1-pro"}}),
        )
        .await;

        let state = encoded_state("v1", None);
        let exchange = f
            .exchanger
            .exchange_code(&f.fallback, "abc", &state, "v1")
            .await
            .unwrap();

        assert_eq!(exchange.access_token, "at-1");
        assert_eq!(exchange.refresh_token, "rt-1");
        assert_eq!(exchange.expires_in, 1800);
        assert_eq!(exchange.email, "user@example.com");
        assert_eq!(exchange.project_id, "proj-1");
        assert_eq!(exchange.tier, AccountTier::Paid);
    }

    #[tokio::test]
    async fn test_tampered_state_fails_before_any_network_call() {
        let f = fixture().await;
        mount_token_ok(&f.server).await;

        let state = encoded_state("v2", None);
        let err = f
            .exchanger
            .exchange_code(&f.fallback, "abc", &state, "v1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StateMismatch));
        assert!(f.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_state_is_rejected() {
        let f = fixture().await;
        let err = f
            .exchanger
            .exchange_code(&f.fallback, "abc", "!!!garbage!!!", "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(f.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_error_reports_status_and_body() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&f.server)
            .await;

        let state = encoded_state("v1", None);
        let err = f
            .exchanger
            .exchange_code(&f.fallback, "abc", &state, "v1")
            .await
            .unwrap_err();

        match err {
            Error::ExchangeFailed(message) => {
                assert!(message.contains("400"));
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("expected ExchangeFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_rejected() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "expires_in": 3600,
            })))
            .mount(&f.server)
            .await;

        let state = encoded_state("v1", None);
        let err = f
            .exchanger
            .exchange_code(&f.fallback, "abc", &state, "v1")
            .await
            .unwrap_err();
        match err {
            Error::ExchangeFailed(message) => assert!(message.contains("refresh token")),
            other => panic!("expected ExchangeFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_state_project_hint_wins_over_detection() {
        let f = fixture().await;
        mount_token_ok(&f.server).await;
        mount_userinfo(&f.server, "user@example.com").await;
        mount_assist(&f.server, json!({"cloudaicompanionProject": "detected"})).await;

        let state = encoded_state("v1", Some("hinted"));
        let exchange = f
            .exchanger
            .exchange_code(&f.fallback, "abc", &state, "v1")
            .await
            .unwrap();
        assert_eq!(exchange.project_id, "hinted");
    }

    #[tokio::test]
    async fn test_userinfo_failure_leaves_email_empty() {
        let f = fixture().await;
        mount_token_ok(&f.server).await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&f.server)
            .await;
        mount_assist(&f.server, json!({"cloudaicompanionProject": "p"})).await;

        let state = encoded_state("v1", None);
        let exchange = f
            .exchanger
            .exchange_code(&f.fallback, "abc", &state, "v1")
            .await
            .unwrap();
        assert_eq!(exchange.email, "");
        assert_eq!(exchange.project_id, "p");
    }

    #[tokio::test]
    async fn test_exchange_defaults_expiry_when_omitted() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
            })))
            .mount(&f.server)
            .await;
        mount_userinfo(&f.server, "u@e.com").await;
        mount_assist(&f.server, json!({"cloudaicompanionProject": "p"})).await;

        let state = encoded_state("v1", None);
        let exchange = f
            .exchanger
            .exchange_code(&f.fallback, "abc", &state, "v1")
            .await
            .unwrap();
        assert_eq!(exchange.expires_in, 3600);
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "expires_in": 7200,
            })))
            .mount(&f.server)
            .await;

        let refreshed = f.exchanger.refresh_access_token("rt-1").await.unwrap();
        assert_eq!(refreshed.access_token, "at-2");
        assert_eq!(refreshed.expires_in, 7200);
        // Provider did not rotate the refresh token.
        assert!(refreshed.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotation_passed_through() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "refresh_token": "rt-2",
                "expires_in": 3600,
            })))
            .mount(&f.server)
            .await;

        let refreshed = f.exchanger.refresh_access_token("rt-1").await.unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn test_refresh_rejection_carries_raw_body() {
        let f = fixture().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&f.server)
            .await;

        let err = f.exchanger.refresh_access_token("rt-1").await.unwrap_err();
        assert!(err.requires_reauth());
        match err {
            Error::RefreshFailed(message) => assert!(message.contains("invalid_grant")),
            other => panic!("expected RefreshFailed, got {:?}", other),
        }
    }
}
