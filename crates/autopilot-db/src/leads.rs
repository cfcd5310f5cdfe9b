//! Outreach leads and rolling deliverability counts.

use autopilot_core::error::{AutopilotError, Result};
use autopilot_core::lead::{DeliveryEvent, LeadStatus};
use autopilot_core::time::format_ts;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::{Store, sql_err};

/// One contact inside one campaign's outreach list.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OutreachLead {
    pub id: String,
    pub user_id: String,
    pub campaign_id: String,
    pub email: String,
    pub status: LeadStatus,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub opened_at: Option<String>,
    pub clicked_at: Option<String>,
    pub bounced_at: Option<String>,
    pub complained_at: Option<String>,
    pub unsubscribed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Trailing-window counts for one `(user, campaign)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct DeliverabilityStats {
    pub total_sent: i64,
    pub bounced: i64,
    /// Complaints and unsubscribes, counted together.
    pub complained: i64,
}

impl DeliverabilityStats {
    /// `None` on a cold campaign (nothing sent yet).
    pub fn bounce_rate(&self) -> Option<f64> {
        (self.total_sent > 0).then(|| self.bounced as f64 / self.total_sent as f64)
    }

    pub fn complaint_rate(&self) -> Option<f64> {
        (self.total_sent > 0).then(|| self.complained as f64 / self.total_sent as f64)
    }
}

const LEAD_SELECT: &str = "SELECT id,user_id,campaign_id,email,status,sent_at,delivered_at,opened_at,clicked_at,bounced_at,complained_at,unsubscribed_at,created_at,updated_at FROM outreach_leads";

fn row_to_lead(row: &rusqlite::Row) -> rusqlite::Result<OutreachLead> {
    let status: String = row.get(4)?;
    Ok(OutreachLead {
        id: row.get(0)?,
        user_id: row.get(1)?,
        campaign_id: row.get(2)?,
        email: row.get(3)?,
        status: status.parse().unwrap_or(LeadStatus::Pending),
        sent_at: row.get(5)?,
        delivered_at: row.get(6)?,
        opened_at: row.get(7)?,
        clicked_at: row.get(8)?,
        bounced_at: row.get(9)?,
        complained_at: row.get(10)?,
        unsubscribed_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl Store {
    /// Add a lead that has not been contacted yet.
    pub fn create_lead(&self, user_id: &str, campaign_id: &str, email: &str) -> Result<OutreachLead> {
        self.insert_lead(user_id, campaign_id, email, LeadStatus::Pending, None)
    }

    /// Record an outreach send. The lead starts life as `sent`.
    pub fn record_outreach_send(
        &self,
        user_id: &str,
        campaign_id: &str,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<OutreachLead> {
        self.insert_lead(user_id, campaign_id, email, LeadStatus::Sent, Some(at))
    }

    fn insert_lead(
        &self,
        user_id: &str,
        campaign_id: &str,
        email: &str,
        status: LeadStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<OutreachLead> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(AutopilotError::Invalid("lead email is empty".into()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_ts(Utc::now());
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO outreach_leads (id,user_id,campaign_id,email,status,sent_at,created_at,updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
                params![id, user_id, campaign_id, email, status.as_str(), sent_at.map(format_ts), now],
            )
            .map_err(sql_err("Insert lead"))?;
        }
        self.get_lead(&id)?
            .ok_or_else(|| AutopilotError::NotFound(format!("lead {id}")))
    }

    pub fn get_lead(&self, id: &str) -> Result<Option<OutreachLead>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{LEAD_SELECT} WHERE id=?1"), params![id], row_to_lead)
            .optional()
            .map_err(sql_err("Get lead"))
    }

    /// Every lead addressed to this email, across campaigns.
    pub fn leads_by_email(&self, email: &str) -> Result<Vec<OutreachLead>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{LEAD_SELECT} WHERE email=?1 ORDER BY created_at"))
            .map_err(sql_err("Prepare"))?;
        let leads = stmt
            .query_map(params![normalize_email(email)], row_to_lead)
            .map_err(sql_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(leads)
    }

    /// Move a lead from `from` to `to`, stamping the event's timestamp
    /// column. Conditional on the current status so that two concurrent
    /// deliveries cannot both apply. Returns `true` if this call won.
    pub fn transition_lead(
        &self,
        lead_id: &str,
        from: LeadStatus,
        to: LeadStatus,
        event: &DeliveryEvent,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(column) = event.timestamp_column() else {
            return Ok(false);
        };
        let ts = format_ts(at);
        // A complaint also marks the unsubscribe it results in.
        let extra = if matches!(event, DeliveryEvent::Complained) {
            ", unsubscribed_at=?3"
        } else {
            ""
        };
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE outreach_leads SET status=?2, {column}=?3{extra}, updated_at=?3 WHERE id=?1 AND status=?4"
                ),
                params![lead_id, to.as_str(), ts, from.as_str()],
            )
            .map_err(sql_err("Transition lead"))?;
        Ok(changed > 0)
    }

    /// Counts over leads sent since `since` for one campaign. Bounces and
    /// complaints are counted against the same sends, whenever they arrived.
    pub fn deliverability_stats(
        &self,
        user_id: &str,
        campaign_id: &str,
        since: DateTime<Utc>,
    ) -> Result<DeliverabilityStats> {
        let since = format_ts(since);
        let conn = self.conn()?;
        conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status='bounced' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status='unsubscribed' THEN 1 ELSE 0 END), 0)
             FROM outreach_leads WHERE user_id=?1 AND campaign_id=?2 AND sent_at >= ?3",
            params![user_id, campaign_id, since],
            |row| {
                Ok(DeliverabilityStats {
                    total_sent: row.get(0)?,
                    bounced: row.get(1)?,
                    complained: row.get(2)?,
                })
            },
        )
        .map_err(sql_err("Deliverability stats"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn test_record_send_and_lookup() {
        let db = store();
        let lead = db
            .record_outreach_send("u1", "c1", " Jane@Example.COM ", Utc::now())
            .unwrap();
        assert_eq!(lead.status, LeadStatus::Sent);
        assert_eq!(lead.email, "jane@example.com");
        assert!(lead.sent_at.is_some());
        assert_eq!(db.leads_by_email("JANE@example.com").unwrap().len(), 1);
        assert!(db.leads_by_email("nobody@example.com").unwrap().is_empty());
        assert!(db.create_lead("u1", "c1", "  ").is_err());
    }

    #[test]
    fn test_transition_is_conditional() {
        let db = store();
        let lead = db.record_outreach_send("u1", "c1", "a@b.co", Utc::now()).unwrap();
        let now = Utc::now();
        assert!(
            db.transition_lead(&lead.id, LeadStatus::Sent, LeadStatus::Bounced, &DeliveryEvent::Bounced, now)
                .unwrap()
        );
        // Stale `from` loses.
        assert!(
            !db.transition_lead(&lead.id, LeadStatus::Sent, LeadStatus::Delivered, &DeliveryEvent::Delivered, now)
                .unwrap()
        );
        let lead = db.get_lead(&lead.id).unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Bounced);
        assert!(lead.bounced_at.is_some());
        assert!(lead.delivered_at.is_none());
    }

    #[test]
    fn test_complaint_stamps_both_columns() {
        let db = store();
        let lead = db.record_outreach_send("u1", "c1", "a@b.co", Utc::now()).unwrap();
        db.transition_lead(
            &lead.id,
            LeadStatus::Sent,
            LeadStatus::Unsubscribed,
            &DeliveryEvent::Complained,
            Utc::now(),
        )
        .unwrap();
        let lead = db.get_lead(&lead.id).unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Unsubscribed);
        assert!(lead.complained_at.is_some());
        assert!(lead.unsubscribed_at.is_some());
    }

    #[test]
    fn test_stats_window_and_scope() {
        let db = store();
        let now = Utc::now();
        for i in 0..10 {
            let lead = db
                .record_outreach_send("u1", "c1", &format!("l{i}@x.io"), now - Duration::days(1))
                .unwrap();
            if i < 2 {
                db.transition_lead(&lead.id, LeadStatus::Sent, LeadStatus::Bounced, &DeliveryEvent::Bounced, now)
                    .unwrap();
            }
            if i == 9 {
                db.transition_lead(
                    &lead.id,
                    LeadStatus::Sent,
                    LeadStatus::Unsubscribed,
                    &DeliveryEvent::Unsubscribed,
                    now,
                )
                .unwrap();
            }
        }
        // Sent outside the window; its late bounce does not count either.
        let old = db.record_outreach_send("u1", "c1", "old@x.io", now - Duration::days(45)).unwrap();
        db.transition_lead(&old.id, LeadStatus::Sent, LeadStatus::Bounced, &DeliveryEvent::Bounced, now)
            .unwrap();
        // Other campaign.
        db.record_outreach_send("u1", "c2", "other@x.io", now).unwrap();
        // Never sent, then bounced: no send to charge it to.
        let pending = db.create_lead("u1", "c1", "pending@x.io").unwrap();
        db.transition_lead(&pending.id, LeadStatus::Pending, LeadStatus::Bounced, &DeliveryEvent::Bounced, now)
            .unwrap();

        let stats = db.deliverability_stats("u1", "c1", now - Duration::days(30)).unwrap();
        assert_eq!(stats, DeliverabilityStats { total_sent: 10, bounced: 2, complained: 1 });
        assert!((stats.bounce_rate().unwrap() - 0.2).abs() < 1e-9);

        let cold = db.deliverability_stats("u1", "c9", now - Duration::days(30)).unwrap();
        assert_eq!(cold.total_sent, 0);
        assert!(cold.bounce_rate().is_none());
        assert!(cold.complaint_rate().is_none());
    }
}
