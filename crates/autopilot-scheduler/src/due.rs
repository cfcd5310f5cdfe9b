//! Due-action evaluation. Pure: no I/O, `now` is passed in.

use autopilot_core::action::{ActionKind, UsageCounters};
use autopilot_db::{Campaign, DueAt, SchedulableCampaign};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One unit of work for the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuePair {
    pub user_id: String,
    pub campaign_id: String,
    pub action: ActionKind,
}

/// A kind is due once its clock has elapsed and the owner still has quota.
pub fn is_kind_due(
    campaign: &Campaign,
    usage: &UsageCounters,
    kind: ActionKind,
    now: DateTime<Utc>,
) -> bool {
    if !campaign.is_schedulable() {
        return false;
    }
    let due = campaign.due_at(kind);
    if due == DueAt::Never {
        tracing::warn!("⚠️ Campaign {} has an unusable {kind} cadence; skipping", campaign.id);
        return false;
    }
    due.elapsed(now) && usage.has_headroom(kind)
}

/// Due pairs for one campaign, 0 to 3 of them. `None` when the owning user
/// could not be resolved; the caller counts that as a skip.
pub fn due_actions(entry: &SchedulableCampaign, now: DateTime<Utc>) -> Option<Vec<DuePair>> {
    let usage = entry.usage.as_ref()?;
    let c = &entry.campaign;
    Some(
        ActionKind::ALL
            .into_iter()
            .filter(|kind| is_kind_due(c, usage, *kind, now))
            .map(|action| DuePair {
                user_id: c.user_id.clone(),
                campaign_id: c.id.clone(),
                action,
            })
            .collect(),
    )
}
