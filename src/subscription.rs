//! Subscription tier resolution.
//!
//! Combines manual configuration and OAuth state into one effective tier,
//! evaluated top to bottom with the first match winning:
//!
//! 1. Manual API key preferred and a manual tier override → the override.
//! 2. OAuth-authenticated → Pro, unless the user forced Enterprise.
//! 3. Manual API key present with a manual tier override → the override.
//! 4. A bare manual tier configuration → used verbatim.
//! 5. Free.
//!
//! The result is cached for five minutes; login, logout and settings
//! changes should call [`SubscriptionResolver::invalidate`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::cache::TtlCache;
use crate::config::AuthSettings;

/// TTL for the resolved subscription.
const SUBSCRIPTION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Effective entitlement level of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// No paid entitlement.
    #[default]
    Free,
    /// Paid individual entitlement (granted to any OAuth-authenticated user).
    Pro,
    /// Enterprise entitlement, only ever set manually.
    Enterprise,
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Request-rate ceilings for a tier. `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimits {
    /// Requests per minute.
    pub requests_per_minute: i32,
    /// Requests per day.
    pub requests_per_day: i32,
}

/// What a tier is allowed to do. Derived, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    /// The effective tier.
    pub tier: SubscriptionTier,
    /// Models the tier may use; `["*"]` means all.
    pub available_models: Vec<String>,
    /// Rate ceilings.
    pub rate_limits: RateLimits,
    /// Feature flags; `["*"]` means all.
    pub enabled_features: Vec<String>,
    /// Monthly spend ceiling in USD; `-1` means unlimited.
    pub monthly_cost_cap: f64,
}

/// Capability to report whether an OAuth credential exists.
///
/// Implemented by [`crate::store::CredentialStore`]; injected here so the
/// resolver has no compile-time dependency on how authentication works.
#[async_trait]
pub trait AuthStatusSource: Send + Sync {
    /// Whether the session holds an OAuth credential.
    async fn is_authenticated(&self) -> bool;
}

/// Resolves and caches the effective subscription.
pub struct SubscriptionResolver {
    settings: Arc<RwLock<AuthSettings>>,
    auth: Arc<dyn AuthStatusSource>,
    cache: Mutex<TtlCache<SubscriptionInfo>>,
}

impl SubscriptionResolver {
    /// Create a resolver over the shared settings and the auth capability.
    pub fn new(settings: Arc<RwLock<AuthSettings>>, auth: Arc<dyn AuthStatusSource>) -> Self {
        Self {
            settings,
            auth,
            cache: Mutex::new(TtlCache::new(SUBSCRIPTION_CACHE_TTL)),
        }
    }

    /// The effective subscription, recomputed on cache miss.
    pub async fn get_subscription(&self) -> SubscriptionInfo {
        if let Some(cached) = self.cache.lock().await.get() {
            return cached;
        }

        let tier = self.resolve_tier().await;
        let info = subscription_for(tier);
        debug!(%tier, "Resolved subscription tier");
        self.cache.lock().await.set(info.clone());
        info
    }

    /// Drop the cached result. Call after login/logout/refresh or when the
    /// host's configuration changes.
    pub async fn invalidate(&self) {
        self.cache.lock().await.invalidate();
    }

    /// Whether a feature is enabled for the current tier.
    pub async fn is_feature_enabled(&self, feature: &str) -> bool {
        let info = self.get_subscription().await;
        wildcard_contains(&info.enabled_features, feature)
    }

    /// Whether a model is available for the current tier.
    pub async fn is_model_available(&self, model: &str) -> bool {
        let info = self.get_subscription().await;
        wildcard_contains(&info.available_models, model)
    }

    async fn resolve_tier(&self) -> SubscriptionTier {
        let settings = self.settings.read().await.clone();
        let manual_override = manual_override(&settings);

        // 1. Preferred manual key with an explicit override.
        if settings.prefer_manual_api_key && settings.manual_api_key.is_some() {
            if let Some(tier) = manual_override {
                return tier;
            }
        }

        // 2. OAuth grants Pro; a manual Enterprise setting is honored on top.
        if self.auth.is_authenticated().await {
            if settings.manual_tier == Some(SubscriptionTier::Enterprise) {
                return SubscriptionTier::Enterprise;
            }
            return SubscriptionTier::Pro;
        }

        // 3. Manual key without OAuth.
        if settings.manual_api_key.is_some() {
            if let Some(tier) = manual_override {
                return tier;
            }
        }

        // 4. Bare tier configuration.
        if let Some(tier) = settings.manual_tier {
            return tier;
        }

        // 5. Default.
        SubscriptionTier::Free
    }
}

/// The override tiers a manual API key can select. A configured Free is
/// not an override; it falls through to the later rules.
fn manual_override(settings: &AuthSettings) -> Option<SubscriptionTier> {
    match settings.manual_tier {
        Some(tier @ (SubscriptionTier::Pro | SubscriptionTier::Enterprise)) => Some(tier),
        _ => None,
    }
}

fn wildcard_contains(list: &[String], item: &str) -> bool {
    list.iter().any(|entry| entry == "*" || entry == item)
}

/// Capability table per tier.
pub fn subscription_for(tier: SubscriptionTier) -> SubscriptionInfo {
    match tier {
        SubscriptionTier::Free => SubscriptionInfo {
            tier,
            available_models: vec![
                "google/gemini-flash".to_string(),
                "opencode/grok-code".to_string(),
            ],
            rate_limits: RateLimits {
                requests_per_minute: 10,
                requests_per_day: 1000,
            },
            enabled_features: vec!["basic_lsp".to_string(), "simple_agents".to_string()],
            monthly_cost_cap: 0.0,
        },
        SubscriptionTier::Pro => SubscriptionInfo {
            tier,
            available_models: vec![
                "google/gemini-3-pro-high".to_string(),
                "anthropic/claude-sonnet-4-5".to_string(),
                "openai/gpt-5.2-medium".to_string(),
                "google/gemini-flash".to_string(),
                "opencode/grok-code".to_string(),
            ],
            rate_limits: RateLimits {
                requests_per_minute: 60,
                requests_per_day: 10_000,
            },
            enabled_features: vec![
                "advanced_lsp".to_string(),
                "multi_agent".to_string(),
                "background_execution".to_string(),
                "supermemory".to_string(),
                "workflows".to_string(),
            ],
            monthly_cost_cap: 50.0,
        },
        SubscriptionTier::Enterprise => SubscriptionInfo {
            tier,
            available_models: vec!["*".to_string()],
            rate_limits: RateLimits {
                requests_per_minute: -1,
                requests_per_day: -1,
            },
            enabled_features: vec!["*".to_string()],
            monthly_cost_cap: -1.0,
        },
    }
}
