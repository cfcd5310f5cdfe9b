//! Append-only activity ledger.

use autopilot_core::error::Result;
use autopilot_core::time::{format_ts, parse_ts};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::{Store, sql_err};

/// A stored activity row.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: i64,
    pub user_id: String,
    pub campaign_id: Option<String>,
    pub action_type: String,
    pub result: String,
    pub platforms: Vec<String>,
    pub details: serde_json::Value,
    pub created_at: String,
}

/// Input for [`Store::append_activity`].
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: String,
    pub campaign_id: Option<String>,
    pub action_type: String,
    pub result: String,
    pub platforms: Vec<String>,
    pub details: serde_json::Value,
}

impl NewActivity {
    pub fn new(user_id: impl Into<String>, action_type: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            campaign_id: None,
            action_type: action_type.into(),
            result: result.into(),
            platforms: Vec::new(),
            details: serde_json::json!({}),
        }
    }

    pub fn campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

const ACTIVITY_SELECT: &str =
    "SELECT id,user_id,campaign_id,action_type,result,platforms,details,created_at FROM activity_log";

fn row_to_activity(row: &rusqlite::Row) -> rusqlite::Result<ActivityRecord> {
    let platforms: String = row.get(5)?;
    let details: String = row.get(6)?;
    Ok(ActivityRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        campaign_id: row.get(2)?,
        action_type: row.get(3)?,
        result: row.get(4)?,
        platforms: serde_json::from_str(&platforms).unwrap_or_default(),
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        created_at: row.get(7)?,
    })
}

impl Store {
    /// Append a record. Returns the new row id.
    pub fn append_activity(&self, record: &NewActivity, at: DateTime<Utc>) -> Result<i64> {
        let platforms = serde_json::to_string(&record.platforms)?;
        let details = serde_json::to_string(&record.details)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO activity_log (user_id,campaign_id,action_type,result,platforms,details,created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                record.user_id,
                record.campaign_id,
                record.action_type,
                record.result,
                platforms,
                details,
                format_ts(at),
            ],
        )
        .map_err(sql_err("Append activity"))?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent records for a user, newest first.
    pub fn recent_activity(
        &self,
        user_id: &str,
        campaign_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{ACTIVITY_SELECT} WHERE user_id=?1 AND (?2 IS NULL OR campaign_id=?2)
                 ORDER BY created_at DESC, id DESC LIMIT ?3"
            ))
            .map_err(sql_err("Prepare"))?;
        let records = stmt
            .query_map(params![user_id, campaign_id, limit as i64], row_to_activity)
            .map_err(sql_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Records of one type for one campaign at or after `since`.
    pub fn count_activity_since(
        &self,
        user_id: &str,
        campaign_id: &str,
        action_type: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM activity_log
             WHERE user_id=?1 AND campaign_id=?2 AND action_type=?3 AND created_at >= ?4",
            params![user_id, campaign_id, action_type, format_ts(since)],
            |row| row.get(0),
        )
        .map_err(sql_err("Count activity"))
    }

    /// Timestamp of the oldest matching record at or after `since`.
    /// Used to tell a rate-limited caller when a slot frees up.
    pub fn oldest_activity_since(
        &self,
        user_id: &str,
        campaign_id: &str,
        action_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let ts: Option<String> = conn
            .query_row(
                "SELECT MIN(created_at) FROM activity_log
                 WHERE user_id=?1 AND campaign_id=?2 AND action_type=?3 AND created_at >= ?4",
                params![user_id, campaign_id, action_type, format_ts(since)],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("Oldest activity"))?
            .flatten();
        Ok(ts.as_deref().and_then(parse_ts))
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
    fn test_append_and_recent() {
        let db = store();
        let now = Utc::now();
        let first = db
            .append_activity(
                &NewActivity::new("u1", "post", "success")
                    .campaign("c1")
                    .platforms(vec!["twitter".into()]),
                now - Duration::minutes(5),
            )
            .unwrap();
        let second = db
            .append_activity(
                &NewActivity::new("u1", "auto_pause", "paused")
                    .campaign("c1")
                    .details(serde_json::json!({"bounceRate": 0.12})),
                now,
            )
            .unwrap();
        db.append_activity(&NewActivity::new("u1", "post", "success").campaign("c2"), now)
            .unwrap();
        db.append_activity(&NewActivity::new("u2", "post", "success"), now).unwrap();
        assert!(second > first);

        let all = db.recent_activity("u1", None, 50).unwrap();
        assert_eq!(all.len(), 3);

        let c1 = db.recent_activity("u1", Some("c1"), 50).unwrap();
        assert_eq!(c1.len(), 2);
        assert_eq!(c1[0].action_type, "auto_pause"); // newest first
        assert_eq!(c1[0].details["bounceRate"], 0.12);
        assert_eq!(c1[1].platforms, vec!["twitter".to_string()]);

        assert_eq!(db.recent_activity("u1", None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_count_and_oldest_since() {
        let db = store();
        let now = Utc::now();
        for mins in [90, 40, 10] {
            db.append_activity(
                &NewActivity::new("u1", "verification_resend", "sent").campaign("c1"),
                now - Duration::minutes(mins),
            )
            .unwrap();
        }
        let hour_ago = now - Duration::hours(1);
        assert_eq!(
            db.count_activity_since("u1", "c1", "verification_resend", hour_ago).unwrap(),
            2
        );
        assert_eq!(db.count_activity_since("u1", "c1", "post", hour_ago).unwrap(), 0);

        let oldest = db
            .oldest_activity_since("u1", "c1", "verification_resend", hour_ago)
            .unwrap()
            .unwrap();
        assert!(((now - oldest).num_seconds() - 40 * 60).abs() <= 1);
        assert!(
            db.oldest_activity_since("u1", "c9", "verification_resend", hour_ago)
                .unwrap()
                .is_none()
        );
    }
}
