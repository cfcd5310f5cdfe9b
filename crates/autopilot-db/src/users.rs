//! Users, usage counters, connected platforms and sessions.
//!
//! The core only reads these. The write helpers here exist for the
//! subsystems that own them (billing mirror, OAuth callbacks, login) and
//! for seeding.

use autopilot_core::action::{UsageCounter, UsageCounters};
use autopilot_core::error::Result;
use autopilot_core::time::{format_ts, parse_ts};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};

use crate::{Store, sql_err};

/// User record joined with usage counters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: String,
    pub external_id: Option<String>,
    pub email: String,
    pub plan_type: String,
    pub usage: UsageCounters,
    pub created_at: String,
}

/// Input for [`Store::create_user`].
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: Option<String>,
    pub external_id: Option<String>,
    pub email: String,
    pub plan_type: String,
    pub usage: UsageCounters,
}

const USER_SELECT: &str = "SELECT id,external_id,email,plan_type,posts_used,posts_limit,videos_used,videos_limit,emails_used,emails_limit,created_at FROM users";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        external_id: row.get(1)?,
        email: row.get(2)?,
        plan_type: row.get(3)?,
        usage: UsageCounters {
            posts: UsageCounter::new(row.get(4)?, row.get(5)?),
            videos: UsageCounter::new(row.get(6)?, row.get(7)?),
            emails: UsageCounter::new(row.get(8)?, row.get(9)?),
        },
        created_at: row.get(10)?,
    })
}

impl Store {
    // ── Users ────────────────────────────────────────

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let plan = if new.plan_type.is_empty() { "free" } else { new.plan_type.as_str() };
        let u = &new.usage;
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO users (id,external_id,email,plan_type,posts_used,posts_limit,videos_used,videos_limit,emails_used,emails_limit,created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    id,
                    new.external_id,
                    new.email,
                    plan,
                    u.posts.used,
                    u.posts.limit,
                    u.videos.used,
                    u.videos.limit,
                    u.emails.used,
                    u.emails.limit,
                    format_ts(Utc::now()),
                ],
            )
            .map_err(sql_err("Create user"))?;
        }
        self.get_user(&id)?
            .ok_or_else(|| autopilot_core::AutopilotError::NotFound(format!("user {id}")))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        conn.query_row(&format!("{USER_SELECT} WHERE id=?1"), params![id], row_to_user)
            .optional()
            .map_err(sql_err("Get user"))
    }

    /// Resolve a user by primary key, falling back to the external identity.
    pub fn find_user(&self, key: &str) -> Result<Option<User>> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(user) = self.get_user(key)? {
            return Ok(Some(user));
        }
        let conn = self.conn()?;
        conn.query_row(
            &format!("{USER_SELECT} WHERE external_id=?1"),
            params![key],
            row_to_user,
        )
        .optional()
        .map_err(sql_err("Find user"))
    }

    // ── Connected platforms ──────────────────────────

    /// Mirror a credential record's existence and state.
    pub fn upsert_connected_platform(&self, user_id: &str, platform: &str, is_active: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO connected_platforms (user_id, platform, is_active, connected_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, platform) DO UPDATE SET is_active=excluded.is_active",
            params![user_id, platform.trim().to_ascii_lowercase(), is_active as i32, format_ts(Utc::now())],
        )
        .map_err(sql_err("Upsert platform"))?;
        Ok(())
    }

    /// Names of the user's platforms with an active credential.
    pub fn active_platforms(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT platform FROM connected_platforms WHERE user_id=?1 AND is_active=1 ORDER BY platform")
            .map_err(sql_err("Prepare"))?;
        let names = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .map_err(sql_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    // ── Sessions ─────────────────────────────────────

    /// Issue a session token for a user.
    pub fn create_session(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, format_ts(Utc::now() + ttl)],
        )
        .map_err(sql_err("Create session"))?;
        Ok(token)
    }

    /// User id behind a live session token.
    pub fn resolve_session(&self, token: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token=?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err("Resolve session"))?;
        Ok(row.and_then(|(user_id, expires)| {
            parse_ts(&expires).filter(|exp| *exp > now).map(|_| user_id)
        }))
    }
}
