//! Dispatch gateway: may this action run now, and with what context?
//!
//! Gates run in a fixed order and the first failure wins:
//!
//! ```text
//! secret ─▶ action ─▶ user ─▶ headroom ─▶ campaign ─▶ platforms ─▶ Authorized
//!   │         │        │         │           │            │
//! Denied    Denied   Denied   Skipped     Skipped      Skipped
//! ```
//!
//! Nothing here writes. Calling twice against unchanged state gives the
//! same answer.

use autopilot_core::action::{ActionKind, Headroom};
use autopilot_core::error::Result;
use autopilot_core::platform::{Platform, resolve_platforms};
use autopilot_db::Store;
use autopilot_security::{SecretCheck, SharedSecret};
use serde::{Deserialize, Serialize};

/// Inbound request from the workflow engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    #[serde(default, alias = "user_id")]
    pub user_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, alias = "campaign_id")]
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotConfigured,
    Unauthorized,
    InvalidAction,
    UserNotFound,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::Unauthorized => "unauthorized",
            Self::InvalidAction => "invalid_action",
            Self::UserNotFound => "user_not_found",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NotConfigured => "dispatch secret not configured",
            Self::Unauthorized => "unauthorized",
            Self::InvalidAction => "invalid action",
            Self::UserNotFound => "user not found",
        }
    }

    /// HTTP status the wire layer uses for this denial.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotConfigured => 500,
            Self::Unauthorized => 401,
            Self::InvalidAction => 400,
            Self::UserNotFound => 404,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LimitReached,
    NoCampaign,
    CampaignInactive,
    CampaignPaused,
    NoConnectedPlatforms,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LimitReached => "limit_reached",
            Self::NoCampaign => "no_campaign",
            Self::CampaignInactive => "campaign_inactive",
            Self::CampaignPaused => "campaign_paused",
            Self::NoConnectedPlatforms => "no_connected_platforms",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::LimitReached => "usage limit reached for this action",
            Self::NoCampaign => "no campaign found",
            Self::CampaignInactive => "campaign is not active",
            Self::CampaignPaused => "campaign is paused",
            Self::NoConnectedPlatforms => "no connected platforms for this action",
        }
    }
}

/// Campaign content fields handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignBrief {
    pub name: String,
    pub niche: String,
    pub brand_voice: String,
    pub target_audience: String,
    pub topics: Vec<String>,
}

/// Everything the executor needs, and no credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub user_id: String,
    pub campaign_id: String,
    pub action: ActionKind,
    pub plan_type: String,
    pub headroom: Headroom,
    pub campaign: CampaignBrief,
    pub platforms: Vec<Platform>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchDecision {
    Authorized(Box<ExecutionContext>),
    Skipped(SkipReason),
    Denied(DenyReason),
}

impl DispatchDecision {
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Authorized(_) => "authorized",
            Self::Skipped(_) => "skipped",
            Self::Denied(_) => "denied",
        }
    }
}

/// Run every gate. A store failure is an `Err`; every expected refusal is
/// a value.
pub fn authorize(
    store: &Store,
    secret: &SharedSecret,
    presented: Option<&str>,
    request: &AuthorizeRequest,
) -> Result<DispatchDecision> {
    match secret.check(presented) {
        SecretCheck::Ok => {}
        SecretCheck::NotConfigured => {
            tracing::error!("❌ Dispatch called but no dispatch secret is configured");
            return Ok(DispatchDecision::Denied(DenyReason::NotConfigured));
        }
        SecretCheck::Unauthorized => return Ok(DispatchDecision::Denied(DenyReason::Unauthorized)),
    }

    let Ok(kind) = request.action.parse::<ActionKind>() else {
        return Ok(DispatchDecision::Denied(DenyReason::InvalidAction));
    };
    let Some(user) = store.find_user(&request.user_id)? else {
        return Ok(DispatchDecision::Denied(DenyReason::UserNotFound));
    };

    if !user.usage.has_headroom(kind) {
        return Ok(DispatchDecision::Skipped(SkipReason::LimitReached));
    }

    let requested = request
        .campaign_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let Some(campaign) = store.campaign_for_user(&user.id, requested)? else {
        return Ok(DispatchDecision::Skipped(SkipReason::NoCampaign));
    };
    if !campaign.is_active {
        return Ok(DispatchDecision::Skipped(SkipReason::CampaignInactive));
    }
    if campaign.is_paused {
        return Ok(DispatchDecision::Skipped(SkipReason::CampaignPaused));
    }

    let mut connected = store.active_platforms(&user.id)?;
    if kind == ActionKind::Outreach {
        // Email goes out through our own provider and needs no account link.
        connected.push(Platform::Email.as_str().to_string());
    }
    let platforms = resolve_platforms(
        kind,
        &campaign.content_platforms,
        &campaign.outreach_platforms,
        &connected,
    );
    if platforms.is_empty() {
        return Ok(DispatchDecision::Skipped(SkipReason::NoConnectedPlatforms));
    }

    tracing::debug!(
        "✅ Authorized {kind} for campaign {} on {} platform(s)",
        campaign.id,
        platforms.len()
    );
    Ok(DispatchDecision::Authorized(Box::new(ExecutionContext {
        user_id: user.id,
        campaign_id: campaign.id,
        action: kind,
        plan_type: user.plan_type,
        headroom: user.usage.remaining(),
        campaign: CampaignBrief {
            name: campaign.name,
            niche: campaign.niche,
            brand_voice: campaign.brand_voice,
            target_audience: campaign.target_audience,
            topics: campaign.topics,
        },
        platforms,
    })))
}
