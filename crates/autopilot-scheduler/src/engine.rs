//! Scheduler pass and the optional in-process interval loop.

use std::sync::Arc;

use autopilot_core::action::ActionKind;
use autopilot_core::error::Result;
use autopilot_core::time::format_ts;
use autopilot_db::Store;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::dispatch::{DispatchRequest, WorkflowDispatcher};
use crate::due::{DuePair, due_actions};

/// Result of triggering one due pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub user_id: String,
    pub campaign_id: String,
    pub action: ActionKind,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What one pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    /// Campaigns looked at.
    pub evaluated: usize,
    /// Campaigns whose owner could not be resolved.
    pub skipped: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub results: Vec<DispatchOutcome>,
}

/// Run one pass at `now`.
///
/// Only a store read failure is an error. Broken campaigns and failed
/// dispatches are counted in the summary and the pass carries on.
pub async fn run_pass(
    store: &Store,
    dispatcher: &dyn WorkflowDispatcher,
    now: DateTime<Utc>,
) -> Result<PassSummary> {
    let campaigns = store.schedulable_campaigns()?;
    let mut summary = PassSummary {
        evaluated: campaigns.len(),
        ..Default::default()
    };

    let mut pairs: Vec<DuePair> = Vec::new();
    for entry in &campaigns {
        match due_actions(entry, now) {
            Some(due) => pairs.extend(due),
            None => {
                tracing::warn!(
                    "⚠️ Campaign {} has no resolvable owner ({}), skipping",
                    entry.campaign.id,
                    entry.campaign.user_id
                );
                summary.skipped += 1;
            }
        }
    }

    let triggered_at = format_ts(now);
    let outcomes = join_all(pairs.iter().map(|pair| {
        let request = DispatchRequest::new(pair, triggered_at.clone());
        async move {
            let result = dispatcher.dispatch(&request).await;
            (pair, result)
        }
    }))
    .await;

    for (pair, result) in outcomes {
        let outcome = match result {
            Ok(()) => {
                summary.dispatched += 1;
                DispatchOutcome {
                    user_id: pair.user_id.clone(),
                    campaign_id: pair.campaign_id.clone(),
                    action: pair.action,
                    ok: true,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Dispatch {} for campaign {} failed: {e}",
                    pair.action,
                    pair.campaign_id
                );
                summary.failed += 1;
                DispatchOutcome {
                    user_id: pair.user_id.clone(),
                    campaign_id: pair.campaign_id.clone(),
                    action: pair.action,
                    ok: false,
                    error: Some(e.to_string()),
                }
            }
        };
        summary.results.push(outcome);
    }

    tracing::info!(
        "⏰ Pass done: {} evaluated, {} dispatched, {} failed, {} skipped",
        summary.evaluated,
        summary.dispatched,
        summary.failed,
        summary.skipped
    );
    Ok(summary)
}

/// Run a pass every `interval_secs` until the task is dropped.
pub async fn spawn_scheduler(
    store: Arc<Store>,
    dispatcher: Arc<dyn WorkflowDispatcher>,
    interval_secs: u64,
) {
    tracing::info!("⏰ Scheduler started (every {}s)", interval_secs);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        if let Err(e) = run_pass(&store, dispatcher.as_ref(), Utc::now()).await {
            tracing::error!("❌ Scheduler pass failed: {e}");
        }
    }
}
