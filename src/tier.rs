//! Project and entitlement-tier detection.
//!
//! Probes the `loadCodeAssist` RPC on each candidate host through the
//! fallback layer and classifies the account as free or paid. The upstream
//! schema is only loosely specified: the project id arrives either as a
//! bare string or nested under `.id`, and tier classification is a
//! heuristic over tier-id naming driven by [`crate::config::TierPolicy`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::constants;
use crate::fallback::{FallbackClient, FallbackRequest};

/// The caller's entitlement level as reported by upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    /// Free or legacy entitlement.
    #[default]
    Free,
    /// Paid entitlement.
    Paid,
}

impl std::fmt::Display for AccountTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Paid => write!(f, "paid"),
        }
    }
}

/// Resolved account metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountInfo {
    /// The companion project id, or the default constant if none was found.
    pub project_id: String,
    /// The detected tier.
    pub tier: AccountTier,
}

/// `loadCodeAssist` response, reduced to the fields we read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadAssistResponse {
    #[serde(default)]
    cloudaicompanion_project: Option<ProjectRef>,
    #[serde(default)]
    allowed_tiers: Vec<TierEntry>,
    #[serde(default)]
    paid_tier: Option<TierEntry>,
}

/// The project field appears as a bare string or as an object with an id.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProjectRef {
    Id(String),
    Object {
        #[serde(default)]
        id: Option<String>,
    },
}

impl ProjectRef {
    fn id(&self) -> Option<&str> {
        let id = match self {
            Self::Id(id) => id.as_str(),
            Self::Object { id } => id.as_deref()?,
        };
        (!id.is_empty()).then_some(id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TierEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    is_default: bool,
}

/// Resolve the project id and tier for an access token.
///
/// Walks the candidate hosts in priority order and returns as soon as one
/// yields a usable project id. A host that answers without a project id
/// still contributes its tier information. If every host is exhausted the
/// default project id is returned with whatever tier was detected (free if
/// nothing was).
pub async fn fetch_account_info(
    fallback: &FallbackClient,
    config: &AuthConfig,
    access_token: &str,
) -> AccountInfo {
    let mut tier = AccountTier::Free;

    let request = FallbackRequest {
        path: constants::LOAD_ASSIST_PATH.to_string(),
        body: json!({
            "metadata": {
                "ideType": constants::IDE_TYPE,
                "platform": constants::PLATFORM,
                "pluginType": constants::PLUGIN_TYPE,
            }
        }),
        bearer: access_token.to_string(),
        headers: constants::api_headers(),
    };

    for endpoint in fallback.endpoints() {
        if !fallback.should_attempt(endpoint).await {
            continue;
        }

        let value = match fallback.attempt(endpoint, &request).await {
            Ok(value) => value,
            Err(e) => {
                warn!(%endpoint, error = %e, "Failed to fetch account info");
                continue;
            }
        };

        let response: LoadAssistResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(e) => {
                warn!(%endpoint, error = %e, "Unrecognized account info response");
                continue;
            }
        };

        if let Some(detected) = classify_tier(&response, config) {
            tier = detected;
        }

        if let Some(project_id) = response.cloudaicompanion_project.as_ref().and_then(ProjectRef::id)
        {
            debug!(%endpoint, %project_id, %tier, "Resolved account info");
            return AccountInfo {
                project_id: project_id.to_string(),
                tier,
            };
        }
    }

    debug!(%tier, "No endpoint reported a project id, using default");
    AccountInfo {
        project_id: config.default_project_id.clone(),
        tier,
    }
}

/// Apply the tier policy to a response. `None` means the response carried
/// no tier signal at all.
fn classify_tier(response: &LoadAssistResponse, config: &AuthConfig) -> Option<AccountTier> {
    let policy = &config.tier_policy;
    let mut tier = None;

    if let Some(default_entry) = response.allowed_tiers.iter().find(|t| t.is_default) {
        if let Some(id) = &default_entry.id {
            tier = Some(if policy.is_free_or_legacy(id) {
                AccountTier::Free
            } else {
                AccountTier::Paid
            });
        }
    }

    if let Some(id) = response.paid_tier.as_ref().and_then(|t| t.id.as_ref()) {
        if !policy.has_free_marker(id) {
            tier = Some(AccountTier::Paid);
        } else if tier.is_none() {
            tier = Some(AccountTier::Free);
        }
    }

    tier
}
