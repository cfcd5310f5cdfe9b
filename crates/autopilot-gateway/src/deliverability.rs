//! Deliverability monitor.
//!
//! Delivery events move outreach leads along their lifecycle. A negative
//! event (bounce, complaint, unsubscribe) triggers a re-evaluation of the
//! affected campaign's trailing-window rates, and a breach pauses it.
//!
//! Write order per event: lead transition, then the pause, then the
//! ledger entry (best-effort). The monitor never unpauses.

use std::collections::BTreeSet;

use autopilot_core::config::DeliverabilityConfig;
use autopilot_core::error::Result;
use autopilot_core::lead::DeliveryEvent;
use autopilot_db::{DeliverabilityStats, NewActivity, Store};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ledger::{AUTO_PAUSE, record_best_effort};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseTrigger {
    ComplaintThreshold,
    BounceThreshold,
}

impl PauseTrigger {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ComplaintThreshold => "complaint rate exceeded threshold",
            Self::BounceThreshold => "bounce rate exceeded threshold",
        }
    }
}

/// Rates and verdict for one campaign.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub total_sent: i64,
    pub bounced: i64,
    pub complained: i64,
    pub bounce_rate: Option<f64>,
    pub complaint_rate: Option<f64>,
    pub window_days: i64,
    pub breach: Option<PauseTrigger>,
}

/// What handling one delivery event did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    pub matched: usize,
    pub transitioned: usize,
    /// Campaigns this event paused.
    pub paused: Vec<String>,
}

/// A parsed delivery webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryNotice {
    pub event: DeliveryEvent,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    NotJson,
    MissingType,
    MissingRecipient,
}

impl PayloadError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotJson => "body is not valid JSON",
            Self::MissingType => "missing event type",
            Self::MissingRecipient => "missing recipient",
        }
    }
}

/// Parse a provider payload. The recipient may sit at `recipient`,
/// `data.to` (string or list) or `data.email`.
pub fn parse_notice(body: &[u8]) -> std::result::Result<DeliveryNotice, PayloadError> {
    let json: serde_json::Value = serde_json::from_slice(body).map_err(|_| PayloadError::NotJson)?;
    let kind = json
        .get("type")
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .ok_or(PayloadError::MissingType)?;
    let event = DeliveryEvent::from_type(kind);

    let data = &json["data"];
    let to = match &data["to"] {
        serde_json::Value::String(s) => Some(s.as_str()),
        serde_json::Value::Array(list) => list.iter().find_map(|v| v.as_str()),
        _ => None,
    };
    let recipient = json["recipient"]
        .as_str()
        .or(to)
        .or_else(|| data["email"].as_str())
        .map(|r| r.trim().to_ascii_lowercase())
        .filter(|r| !r.is_empty());

    if event.is_known() && recipient.is_none() {
        return Err(PayloadError::MissingRecipient);
    }
    Ok(DeliveryNotice { event, recipient })
}

/// Threshold policy.
#[derive(Debug, Clone)]
pub struct DeliverabilityMonitor {
    window: Duration,
    window_days: i64,
    bounce_threshold: f64,
    complaint_threshold: f64,
}

impl DeliverabilityMonitor {
    pub fn new(config: &DeliverabilityConfig) -> Self {
        let window_days = config.window_days.max(1);
        Self {
            window: Duration::days(window_days),
            window_days,
            bounce_threshold: config.bounce_threshold,
            complaint_threshold: config.complaint_threshold,
        }
    }

    /// Pure verdict. Complaints take priority over bounces; a campaign that
    /// has sent nothing is never judged.
    pub fn evaluate(&self, stats: &DeliverabilityStats) -> Option<PauseTrigger> {
        let (Some(bounce), Some(complaint)) = (stats.bounce_rate(), stats.complaint_rate()) else {
            return None;
        };
        if complaint > self.complaint_threshold {
            Some(PauseTrigger::ComplaintThreshold)
        } else if bounce > self.bounce_threshold {
            Some(PauseTrigger::BounceThreshold)
        } else {
            None
        }
    }

    /// Trailing-window health for one campaign.
    pub fn health(&self, store: &Store, user_id: &str, campaign_id: &str, now: DateTime<Utc>) -> Result<HealthReport> {
        let stats = store.deliverability_stats(user_id, campaign_id, now - self.window)?;
        Ok(HealthReport {
            total_sent: stats.total_sent,
            bounced: stats.bounced,
            complained: stats.complained,
            bounce_rate: stats.bounce_rate(),
            complaint_rate: stats.complaint_rate(),
            window_days: self.window_days,
            breach: self.evaluate(&stats),
        })
    }

    /// Evaluate one campaign and pause it on a breach. Returns `true` only
    /// when this call flipped the flag.
    pub fn enforce(&self, store: &Store, user_id: &str, campaign_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let health = self.health(store, user_id, campaign_id, now)?;
        let Some(trigger) = health.breach else {
            return Ok(false);
        };
        if !store.pause_campaign(campaign_id, trigger.reason(), now)? {
            return Ok(false);
        }
        tracing::warn!(
            "⛔ Campaign {campaign_id} auto-paused: {} (bounce={:?}, complaint={:?}, sent={})",
            trigger.reason(),
            health.bounce_rate,
            health.complaint_rate,
            health.total_sent
        );
        record_best_effort(
            store,
            &NewActivity::new(user_id, AUTO_PAUSE, "paused")
                .campaign(campaign_id)
                .details(serde_json::json!({
                    "reason": trigger.reason(),
                    "trigger": trigger,
                    "bounceRate": health.bounce_rate,
                    "complaintRate": health.complaint_rate,
                    "totalSent": health.total_sent,
                    "bounced": health.bounced,
                    "complained": health.complained,
                    "windowDays": health.window_days,
                })),
            now,
        );
        Ok(true)
    }

    /// Apply one delivery event to every lead with this address.
    pub fn handle(&self, store: &Store, notice: &DeliveryNotice, now: DateTime<Utc>) -> Result<EventReport> {
        let mut report = EventReport::default();
        let Some(recipient) = notice.recipient.as_deref() else {
            return Ok(report);
        };
        if !notice.event.is_known() {
            tracing::debug!("📭 Ignoring delivery event {:?}", notice.event);
            return Ok(report);
        }

        let leads = store.leads_by_email(recipient)?;
        report.matched = leads.len();

        let mut affected = BTreeSet::new();
        for lead in leads {
            let Some(next) = lead.status.apply(&notice.event) else {
                continue;
            };
            if store.transition_lead(&lead.id, lead.status, next, &notice.event, now)? {
                report.transitioned += 1;
                if notice.event.is_negative() {
                    affected.insert((lead.user_id, lead.campaign_id));
                }
            }
        }

        for (user_id, campaign_id) in affected {
            if self.enforce(store, &user_id, &campaign_id, now)? {
                report.paused.push(campaign_id);
            }
        }
        Ok(report)
    }
}
