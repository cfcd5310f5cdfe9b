//! AutoPilot SQLite store.
//!
//! One connection behind a mutex, WAL mode, bounded busy timeout. The
//! schema is created idempotently on open, so `:memory:` works for tests.
//!
//! ```text
//! users ──< campaigns ──< outreach_leads
//!   │           └───────< activity_log
//!   ├──< connected_platforms
//!   └──< sessions
//! ```
//! `campaigns.user_id` is not a foreign key. Campaigns whose owner is gone
//! are skipped by the scheduler.

pub mod activity;
pub mod campaigns;
pub mod leads;
pub mod users;

pub use activity::{ActivityRecord, NewActivity};
pub use campaigns::{Campaign, CampaignDraft, DueAt, SchedulableCampaign};
pub use leads::{DeliverabilityStats, OutreachLead};
pub use users::{NewUser, User};

use autopilot_core::error::{AutopilotError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// AutoPilot database handle.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AutopilotError::Database(format!("DB open error: {e}")))?;
        Self::from_connection(conn)
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AutopilotError::Database(format!("DB open error: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| AutopilotError::Database(format!("DB pragma error: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AutopilotError::Database(format!("Lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                external_id TEXT UNIQUE,
                email TEXT NOT NULL DEFAULT '',
                plan_type TEXT NOT NULL DEFAULT 'free',
                posts_used INTEGER NOT NULL DEFAULT 0,
                posts_limit INTEGER NOT NULL DEFAULT 0,
                videos_used INTEGER NOT NULL DEFAULT 0,
                videos_limit INTEGER NOT NULL DEFAULT 0,
                emails_used INTEGER NOT NULL DEFAULT 0,
                emails_limit INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS connected_platforms (
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                connected_at TEXT NOT NULL,
                PRIMARY KEY (user_id, platform)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                post_cadence_hours REAL NOT NULL DEFAULT 24,
                video_cadence_hours REAL NOT NULL DEFAULT 72,
                outreach_cadence_hours REAL NOT NULL DEFAULT 24,
                content_platforms TEXT NOT NULL DEFAULT '{}',  -- JSON {platform: bool}
                outreach_platforms TEXT NOT NULL DEFAULT '{}', -- JSON {channel: bool}
                niche TEXT NOT NULL DEFAULT '',
                brand_voice TEXT NOT NULL DEFAULT '',
                target_audience TEXT NOT NULL DEFAULT '',
                topics TEXT NOT NULL DEFAULT '[]',             -- JSON array
                is_active INTEGER NOT NULL DEFAULT 1,
                is_paused INTEGER NOT NULL DEFAULT 0,
                pause_reason TEXT,
                paused_at TEXT,
                next_post_at TEXT,
                next_video_at TEXT,
                next_outreach_at TEXT,
                updated_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS outreach_leads (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_at TEXT,
                delivered_at TEXT,
                opened_at TEXT,
                clicked_at TEXT,
                bounced_at TEXT,
                complained_at TEXT,
                unsubscribed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leads_email ON outreach_leads(email);
            CREATE INDEX IF NOT EXISTS idx_leads_campaign_status
                ON outreach_leads(campaign_id, status, updated_at);

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                campaign_id TEXT,
                action_type TEXT NOT NULL,
                result TEXT NOT NULL,
                platforms TEXT NOT NULL DEFAULT '[]',
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activity_lookup
                ON activity_log(user_id, campaign_id, action_type, created_at);
            ",
        )
        .map_err(|e| AutopilotError::Database(format!("Migration: {e}")))?;
        Ok(())
    }
}

/// Wrap a rusqlite error with context.
pub(crate) fn sql_err(ctx: &str) -> impl Fn(rusqlite::Error) -> AutopilotError + '_ {
    move |e| AutopilotError::Database(format!("{ctx}: {e}"))
}
