//! Activity ledger helpers: best-effort writes, the resend rate limiter and
//! dispatch reports from the workflow engine.

use autopilot_core::action::ActionKind;
use autopilot_core::config::LedgerConfig;
use autopilot_core::error::{AutopilotError, Result};
use autopilot_db::{NewActivity, Store};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const VERIFICATION_RESEND: &str = "verification_resend";
pub const AUTO_PAUSE: &str = "auto_pause";
pub const RESULT_SUCCESS: &str = "success";

/// Append without failing the caller. Returns the id when the write landed.
pub fn record_best_effort(store: &Store, record: &NewActivity, at: DateTime<Utc>) -> Option<i64> {
    match store.append_activity(record, at) {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(
                "⚠️ Failed to record '{}' activity for {}: {e}",
                record.action_type,
                record.user_id
            );
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendDecision {
    Allowed { remaining: i64 },
    Limited { retry_after_secs: i64 },
}

/// At most `limit` verification resends per campaign per rolling window,
/// counted from the ledger itself.
#[derive(Debug, Clone)]
pub struct ResendLimiter {
    limit: i64,
    window: Duration,
}

impl ResendLimiter {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            limit: config.resend_limit.max(0),
            window: Duration::seconds(config.resend_window_secs.max(1)),
        }
    }

    /// Check the allowance and, when there is room, record the resend.
    pub fn check_and_record(
        &self,
        store: &Store,
        user_id: &str,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ResendDecision> {
        let since = now - self.window;
        let used = store.count_activity_since(user_id, campaign_id, VERIFICATION_RESEND, since)?;
        if used >= self.limit {
            let oldest = store.oldest_activity_since(user_id, campaign_id, VERIFICATION_RESEND, since)?;
            let retry_after = oldest
                .map(|at| (at + self.window - now).num_seconds())
                .unwrap_or(self.window.num_seconds())
                .max(1);
            tracing::info!("🚦 Verification resend limited for campaign {campaign_id}");
            return Ok(ResendDecision::Limited {
                retry_after_secs: retry_after,
            });
        }

        record_best_effort(
            store,
            &NewActivity::new(user_id, VERIFICATION_RESEND, "sent").campaign(campaign_id),
            now,
        );
        Ok(ResendDecision::Allowed {
            remaining: self.limit - used - 1,
        })
    }
}

/// What the workflow engine reports after running (or failing) an action.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    #[serde(alias = "user_id")]
    pub user_id: String,
    #[serde(alias = "campaign_id")]
    pub campaign_id: String,
    pub action: String,
    pub result: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    /// Addresses an outreach run emailed. Each becomes a tracked lead.
    #[serde(default, alias = "to")]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub activity_id: Option<i64>,
    pub clock_advanced: bool,
    pub leads_recorded: usize,
}

/// Record a dispatch result. Only a success moves the campaign's clock;
/// a failure leaves it so the next pass retries. A successful outreach
/// run also records one sent lead per recipient, which is what delivery
/// events are later matched against.
pub fn apply_report(store: &Store, report: &DispatchReport, now: DateTime<Utc>) -> Result<ReportOutcome> {
    let kind: ActionKind = report.action.parse()?;
    let campaign = store
        .campaign_for_user(&report.user_id, Some(&report.campaign_id))?
        .ok_or_else(|| AutopilotError::NotFound(format!("campaign {}", report.campaign_id)))?;

    let success = report.result.eq_ignore_ascii_case(RESULT_SUCCESS);
    let clock_advanced = success && store.mark_dispatched(&campaign.id, kind, now)?;

    let mut leads_recorded = 0;
    if success && kind == ActionKind::Outreach {
        let mut seen = std::collections::BTreeSet::new();
        for email in &report.recipients {
            let email = email.trim().to_ascii_lowercase();
            if email.is_empty() || !seen.insert(email.clone()) {
                continue;
            }
            store.record_outreach_send(&report.user_id, &campaign.id, &email, now)?;
            leads_recorded += 1;
        }
    }

    let details = if report.details.is_null() {
        serde_json::json!({})
    } else {
        report.details.clone()
    };
    let activity_id = record_best_effort(
        store,
        &NewActivity::new(&report.user_id, kind.as_str(), report.result.to_ascii_lowercase())
            .campaign(&campaign.id)
            .platforms(report.platforms.clone())
            .details(details),
        now,
    );

    if success {
        tracing::info!("📝 {kind} succeeded for campaign {}", campaign.id);
    } else {
        tracing::warn!("⚠️ {kind} reported '{}' for campaign {}", report.result, campaign.id);
    }
    Ok(ReportOutcome {
        activity_id,
        clock_advanced,
        leads_recorded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_db::CampaignDraft;

    fn store() -> Store {
        let db = Store::open_in_memory().unwrap();
        let mut draft = CampaignDraft::new("u1", "main");
        draft.id = Some("c1".into());
        draft.post_cadence_hours = 6.0;
        db.create_campaign(&draft).unwrap();
        db
    }

    fn report(result: &str) -> DispatchReport {
        DispatchReport {
            user_id: "u1".into(),
            campaign_id: "c1".into(),
            action: "post".into(),
            result: result.into(),
            platforms: vec!["twitter".into()],
            details: serde_json::Value::Null,
            recipients: Vec::new(),
        }
    }

    #[test]
    fn test_failed_report_leaves_clock() {
        let db = store();
        let out = apply_report(&db, &report("failed"), Utc::now()).unwrap();
        assert!(!out.clock_advanced);
        assert!(out.activity_id.is_some());
        let c = db.get_campaign("c1").unwrap().unwrap();
        assert!(c.next_post_at.is_none());
        assert!(c.updated_at.is_none());
    }

    #[test]
    fn test_success_report_advances_clock() {
        let db = store();
        let now = Utc::now();
        let out = apply_report(&db, &report("success"), now).unwrap();
        assert!(out.clock_advanced);
        let c = db.get_campaign("c1").unwrap().unwrap();
        assert!(c.next_post_at.unwrap() > now + Duration::hours(5));
        let log = db.recent_activity("u1", Some("c1"), 10).unwrap();
        assert_eq!(log[0].action_type, "post");
        assert_eq!(log[0].platforms, vec!["twitter".to_string()]);
    }

    #[test]
    fn test_outreach_success_records_leads() {
        let db = store();
        let mut ok = report("success");
        ok.action = "outreach".into();
        ok.recipients = vec!["Lead@Example.com".into(), "lead@example.com".into(), " ".into(), "b@example.com".into()];
        let out = apply_report(&db, &ok, Utc::now()).unwrap();
        assert_eq!(out.leads_recorded, 2);
        let leads = db.leads_by_email("lead@example.com").unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].campaign_id, "c1");
        assert_eq!(leads[0].status.as_str(), "sent");

        // A failed run sent nothing.
        let mut failed = ok.clone();
        failed.result = "failed".into();
        failed.recipients = vec!["c@example.com".into()];
        assert_eq!(apply_report(&db, &failed, Utc::now()).unwrap().leads_recorded, 0);
        assert!(db.leads_by_email("c@example.com").unwrap().is_empty());
    }

    #[test]
    fn test_report_rejects_bad_input() {
        let db = store();
        let mut bad = report("success");
        bad.action = "podcast".into();
        assert!(matches!(apply_report(&db, &bad, Utc::now()), Err(AutopilotError::Invalid(_))));
        let mut foreign = report("success");
        foreign.user_id = "u2".into();
        assert!(matches!(apply_report(&db, &foreign, Utc::now()), Err(AutopilotError::NotFound(_))));
    }

    #[test]
    fn test_fourth_resend_refused() {
        let db = store();
        let limiter = ResendLimiter::new(&LedgerConfig::default());
        let start = Utc::now();
        for (i, remaining) in [2, 1, 0].into_iter().enumerate() {
            let at = start + Duration::minutes(i as i64 * 10);
            assert_eq!(
                limiter.check_and_record(&db, "u1", "c1", at).unwrap(),
                ResendDecision::Allowed { remaining }
            );
        }
        let fourth = start + Duration::minutes(30);
        let ResendDecision::Limited { retry_after_secs } =
            limiter.check_and_record(&db, "u1", "c1", fourth).unwrap()
        else {
            panic!("expected limited");
        };
        // The first slot frees up an hour after the first resend.
        assert!((retry_after_secs - 30 * 60).abs() <= 1);

        // Other campaigns have their own allowance.
        assert!(matches!(
            limiter.check_and_record(&db, "u1", "c2", fourth).unwrap(),
            ResendDecision::Allowed { .. }
        ));
        // And the window rolls.
        assert!(matches!(
            limiter
                .check_and_record(&db, "u1", "c1", start + Duration::minutes(61))
                .unwrap(),
            ResendDecision::Allowed { .. }
        ));
    }
}
