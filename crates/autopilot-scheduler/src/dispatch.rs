//! Workflow-engine actuator.
//!
//! The scheduler does not run actions itself. It asks the workflow engine
//! to run them; the engine then calls back into the dispatch gateway.

use async_trait::async_trait;
use autopilot_core::action::ActionKind;
use autopilot_core::config::WorkflowConfig;
use autopilot_core::error::{AutopilotError, Result};
use serde::Serialize;
use std::time::Duration;

use crate::due::DuePair;

/// Body posted to the workflow engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub user_id: String,
    pub campaign_id: String,
    pub action: ActionKind,
    pub triggered_at: String,
}

impl DispatchRequest {
    pub fn new(pair: &DuePair, triggered_at: String) -> Self {
        Self {
            user_id: pair.user_id.clone(),
            campaign_id: pair.campaign_id.clone(),
            action: pair.action,
            triggered_at,
        }
    }
}

/// Port to whatever executes an action.
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    /// Trigger one action. An `Err` marks only this pair as failed.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<()>;
}

/// Posts to one webhook URL per action kind.
pub struct HttpWorkflowDispatcher {
    client: reqwest::Client,
    config: WorkflowConfig,
}

impl HttpWorkflowDispatcher {
    pub fn new(config: &WorkflowConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AutopilotError::Http(format!("Client build failed: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn url_for(&self, kind: ActionKind) -> Option<&str> {
        let url = match kind {
            ActionKind::Post => &self.config.post_url,
            ActionKind::Video => &self.config.video_url,
            ActionKind::Outreach => &self.config.outreach_url,
        };
        Some(url.trim()).filter(|u| !u.is_empty())
    }
}

#[async_trait]
impl WorkflowDispatcher for HttpWorkflowDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<()> {
        let url = self.url_for(request.action).ok_or_else(|| {
            AutopilotError::Config(format!("no workflow URL configured for '{}'", request.action))
        })?;

        let mut req = self.client.post(url).json(request);
        if !self.config.auth_token.is_empty() {
            req = req.bearer_auth(&self.config.auth_token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AutopilotError::Http(format!("Workflow send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::debug!(
                "🌐 Workflow accepted {} for campaign {}",
                request.action,
                request.campaign_id
            );
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            Err(AutopilotError::Http(format!("Workflow error {status}: {body}")))
        }
    }
}
