//! Campaign store.

use autopilot_core::action::{ActionKind, UsageCounter, UsageCounters};
use autopilot_core::error::{AutopilotError, Result};
use autopilot_core::platform::PlatformToggles;
use autopilot_core::time::{format_ts, parse_ts};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};

use crate::{Store, sql_err};

/// One user's automation configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Campaign {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub post_cadence_hours: f64,
    pub video_cadence_hours: f64,
    pub outreach_cadence_hours: f64,
    pub content_platforms: PlatformToggles,
    pub outreach_platforms: PlatformToggles,
    pub niche: String,
    pub brand_voice: String,
    pub target_audience: String,
    pub topics: Vec<String>,
    pub is_active: bool,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub paused_at: Option<String>,
    pub next_post_at: Option<DateTime<Utc>>,
    pub next_video_at: Option<DateTime<Utc>>,
    pub next_outreach_at: Option<DateTime<Utc>>,
    /// Last successful dispatch (any kind). `None` if never set or unparseable.
    pub updated_at: Option<DateTime<Utc>>,
    pub created_at: String,
}

impl Campaign {
    pub fn cadence_hours(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Post => self.post_cadence_hours,
            ActionKind::Video => self.video_cadence_hours,
            ActionKind::Outreach => self.outreach_cadence_hours,
        }
    }

    /// Cadence as a duration. `None` when the stored hours do not fit one.
    pub fn cadence(&self, kind: ActionKind) -> Option<Duration> {
        let secs = (self.cadence_hours(kind).max(0.0) * 3600.0).round();
        if !secs.is_finite() || secs >= i64::MAX as f64 {
            return None;
        }
        Duration::try_seconds(secs as i64)
    }

    /// `from` plus one cadence of `kind`, if representable.
    pub fn advance(&self, kind: ActionKind, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        from.checked_add_signed(self.cadence(kind)?)
    }

    /// Explicit per-kind clock, if one has been recorded.
    pub fn next_at(&self, kind: ActionKind) -> Option<DateTime<Utc>> {
        match kind {
            ActionKind::Post => self.next_post_at,
            ActionKind::Video => self.next_video_at,
            ActionKind::Outreach => self.next_outreach_at,
        }
    }

    /// When `kind` becomes due: the explicit clock, else `updated_at +
    /// cadence`. No clock at all means due now; a cadence too large to add
    /// means never.
    pub fn due_at(&self, kind: ActionKind) -> DueAt {
        if let Some(at) = self.next_at(kind) {
            return DueAt::At(at);
        }
        match self.updated_at {
            None => DueAt::Now,
            Some(updated) => self.advance(kind, updated).map_or(DueAt::Never, DueAt::At),
        }
    }

    pub fn is_schedulable(&self) -> bool {
        self.is_active && !self.is_paused
    }
}

/// Outcome of reading a campaign's clock for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueAt {
    Now,
    At(DateTime<Utc>),
    Never,
}

impl DueAt {
    pub fn elapsed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Now => true,
            Self::At(at) => now >= *at,
            Self::Never => false,
        }
    }
}

/// Input for [`Store::create_campaign`].
#[derive(Debug, Clone)]
pub struct CampaignDraft {
    pub id: Option<String>,
    pub user_id: String,
    pub name: String,
    pub post_cadence_hours: f64,
    pub video_cadence_hours: f64,
    pub outreach_cadence_hours: f64,
    pub content_platforms: PlatformToggles,
    pub outreach_platforms: PlatformToggles,
    pub niche: String,
    pub brand_voice: String,
    pub target_audience: String,
    pub topics: Vec<String>,
    pub is_active: bool,
    pub is_paused: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CampaignDraft {
    pub fn new(user_id: &str, name: &str) -> Self {
        Self {
            id: None,
            user_id: user_id.to_string(),
            name: name.to_string(),
            post_cadence_hours: 24.0,
            video_cadence_hours: 72.0,
            outreach_cadence_hours: 24.0,
            content_platforms: PlatformToggles::new(),
            outreach_platforms: PlatformToggles::new(),
            niche: String::new(),
            brand_voice: String::new(),
            target_audience: String::new(),
            topics: Vec::new(),
            is_active: true,
            is_paused: false,
            updated_at: None,
        }
    }
}

/// An active, unpaused campaign joined with its owner's counters.
/// `usage` is `None` when the owning user no longer resolves.
#[derive(Debug, Clone)]
pub struct SchedulableCampaign {
    pub campaign: Campaign,
    pub usage: Option<UsageCounters>,
}

/// Shared column list, `c.`-qualified so it also works inside the join.
const CAMPAIGN_COLUMNS: &str = "c.id,c.user_id,c.name,c.post_cadence_hours,c.video_cadence_hours,c.outreach_cadence_hours,c.content_platforms,c.outreach_platforms,c.niche,c.brand_voice,c.target_audience,c.topics,c.is_active,c.is_paused,c.pause_reason,c.paused_at,c.next_post_at,c.next_video_at,c.next_outreach_at,c.updated_at,c.created_at";
const CAMPAIGN_COLUMN_COUNT: usize = 21;

fn opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(parse_ts)
}

fn row_to_campaign(row: &rusqlite::Row) -> rusqlite::Result<Campaign> {
    let content: String = row.get(6)?;
    let outreach: String = row.get(7)?;
    let topics: String = row.get(11)?;
    Ok(Campaign {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        post_cadence_hours: row.get(3)?,
        video_cadence_hours: row.get(4)?,
        outreach_cadence_hours: row.get(5)?,
        content_platforms: serde_json::from_str(&content).unwrap_or_default(),
        outreach_platforms: serde_json::from_str(&outreach).unwrap_or_default(),
        niche: row.get(8)?,
        brand_voice: row.get(9)?,
        target_audience: row.get(10)?,
        topics: serde_json::from_str(&topics).unwrap_or_default(),
        is_active: row.get::<_, i32>(12)? != 0,
        is_paused: row.get::<_, i32>(13)? != 0,
        pause_reason: row.get(14)?,
        paused_at: row.get(15)?,
        next_post_at: opt_ts(row.get(16)?),
        next_video_at: opt_ts(row.get(17)?),
        next_outreach_at: opt_ts(row.get(18)?),
        updated_at: opt_ts(row.get(19)?),
        created_at: row.get(20)?,
    })
}

fn next_column(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Post => "next_post_at",
        ActionKind::Video => "next_video_at",
        ActionKind::Outreach => "next_outreach_at",
    }
}

impl Store {
    pub fn create_campaign(&self, draft: &CampaignDraft) -> Result<Campaign> {
        let id = draft
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO campaigns (id,user_id,name,post_cadence_hours,video_cadence_hours,outreach_cadence_hours,
                    content_platforms,outreach_platforms,niche,brand_voice,target_audience,topics,
                    is_active,is_paused,updated_at,created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                params![
                    id,
                    draft.user_id,
                    draft.name,
                    draft.post_cadence_hours,
                    draft.video_cadence_hours,
                    draft.outreach_cadence_hours,
                    serde_json::to_string(&draft.content_platforms)?,
                    serde_json::to_string(&draft.outreach_platforms)?,
                    draft.niche,
                    draft.brand_voice,
                    draft.target_audience,
                    serde_json::to_string(&draft.topics)?,
                    draft.is_active as i32,
                    draft.is_paused as i32,
                    draft.updated_at.map(format_ts),
                    format_ts(Utc::now()),
                ],
            )
            .map_err(sql_err("Create campaign"))?;
        }
        self.get_campaign(&id)?
            .ok_or_else(|| AutopilotError::NotFound(format!("campaign {id}")))
    }

    pub fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns c WHERE c.id=?1"),
            params![id],
            row_to_campaign,
        )
        .optional()
        .map_err(sql_err("Get campaign"))
    }

    /// A user's campaign: the requested one if it belongs to them, otherwise
    /// their oldest.
    pub fn campaign_for_user(&self, user_id: &str, campaign_id: Option<&str>) -> Result<Option<Campaign>> {
        let conn = self.conn()?;
        let found = match campaign_id {
            Some(cid) => conn.query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns c WHERE c.id=?1 AND c.user_id=?2"),
                params![cid, user_id],
                row_to_campaign,
            ),
            None => conn.query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns c WHERE c.user_id=?1 ORDER BY c.created_at, c.id LIMIT 1"),
                params![user_id],
                row_to_campaign,
            ),
        };
        found.optional().map_err(sql_err("Campaign for user"))
    }

    /// Active, unpaused campaigns with their owners' usage counters.
    pub fn schedulable_campaigns(&self) -> Result<Vec<SchedulableCampaign>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS}, u.id, u.posts_used, u.posts_limit, u.videos_used, u.videos_limit, u.emails_used, u.emails_limit
                 FROM campaigns c LEFT JOIN users u ON u.id = c.user_id
                 WHERE c.is_active = 1 AND c.is_paused = 0
                 ORDER BY c.created_at"
            ))
            .map_err(sql_err("Prepare"))?;
        let rows = stmt
            .query_map([], |row| {
                let campaign = row_to_campaign(row)?;
                let n = CAMPAIGN_COLUMN_COUNT;
                let owner: Option<String> = row.get(n)?;
                let usage = match owner {
                    Some(_) => Some(UsageCounters {
                        posts: UsageCounter::new(row.get(n + 1)?, row.get(n + 2)?),
                        videos: UsageCounter::new(row.get(n + 3)?, row.get(n + 4)?),
                        emails: UsageCounter::new(row.get(n + 5)?, row.get(n + 6)?),
                    }),
                    None => None,
                };
                Ok(SchedulableCampaign { campaign, usage })
            })
            .map_err(sql_err("Query"))?;

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(c) => out.push(c),
                Err(e) => tracing::warn!("⚠️ Skipping unreadable campaign row: {e}"),
            }
        }
        Ok(out)
    }

    /// Set the pause flag. Returns `true` only if this call flipped it;
    /// pausing an already-paused campaign writes nothing.
    pub fn pause_campaign(&self, id: &str, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET is_paused=1, pause_reason=?2, paused_at=?3 WHERE id=?1 AND is_paused=0",
                params![id, reason, format_ts(at)],
            )
            .map_err(sql_err("Pause campaign"))?;
        Ok(changed > 0)
    }

    /// Clear the pause flag (user control path only).
    pub fn resume_campaign(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET is_paused=0, pause_reason=NULL, paused_at=NULL WHERE id=?1 AND is_paused=1",
                params![id],
            )
            .map_err(sql_err("Resume campaign"))?;
        Ok(changed > 0)
    }

    /// Record a successful dispatch: advance the kind's clock by its cadence
    /// and stamp `updated_at`. Returns `false` if the campaign is gone.
    ///
    /// Sibling kinds still on the legacy `updated_at` clock get their current
    /// due time pinned first, so this stamp cannot push them back.
    pub fn mark_dispatched(&self, id: &str, kind: ActionKind, at: DateTime<Utc>) -> Result<bool> {
        let Some(campaign) = self.get_campaign(id)? else {
            return Ok(false);
        };
        let clocks = ActionKind::ALL.map(|k| {
            if k == kind {
                let next = campaign.advance(k, at);
                if next.is_none() {
                    tracing::warn!("⚠️ Campaign {id} has an unusable {k} cadence; it will not run again");
                }
                return next;
            }
            match campaign.due_at(k) {
                DueAt::At(t) => Some(t),
                DueAt::Now => Some(at),
                DueAt::Never => None,
            }
        });
        let [post, video, outreach] = clocks.map(|c| c.map(format_ts));
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET next_post_at=?2, next_video_at=?3, next_outreach_at=?4, updated_at=?5 WHERE id=?1",
                params![id, post, video, outreach, format_ts(at)],
            )
            .map_err(sql_err("Mark dispatched"))?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn seed_user(db: &Store, id: &str) {
        db.create_user(&NewUser {
            id: Some(id.into()),
            email: format!("{id}@example.com"),
            usage: UsageCounters {
                posts: UsageCounter::new(1, 10),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
    }

    #[test]
    fn test_create_and_get_campaign() {
        let db = store();
        let mut draft = CampaignDraft::new("u1", "main");
        draft.content_platforms.insert("youtube_shorts".into(), true);
        draft.topics = vec!["saas".into()];
        let c = db.create_campaign(&draft).unwrap();
        assert_eq!(c.user_id, "u1");
        assert_eq!(c.content_platforms.get("youtube_shorts"), Some(&true));
        assert_eq!(c.topics, vec!["saas".to_string()]);
        assert!(c.is_schedulable());
        assert!(c.updated_at.is_none());
    }

    #[test]
    fn test_unique_name_per_user() {
        let db = store();
        db.create_campaign(&CampaignDraft::new("u1", "main")).unwrap();
        assert!(db.create_campaign(&CampaignDraft::new("u1", "main")).is_err());
        assert!(db.create_campaign(&CampaignDraft::new("u2", "main")).is_ok());
    }

    #[test]
    fn test_campaign_for_user() {
        let db = store();
        let first = db.create_campaign(&CampaignDraft::new("u1", "a")).unwrap();
        let second = db.create_campaign(&CampaignDraft::new("u1", "b")).unwrap();
        assert!(db.campaign_for_user("u1", None).unwrap().is_some());
        assert_eq!(
            db.campaign_for_user("u1", Some(&second.id)).unwrap().unwrap().id,
            second.id
        );
        // Someone else's campaign is invisible.
        assert!(db.campaign_for_user("u2", Some(&first.id)).unwrap().is_none());
    }

    #[test]
    fn test_schedulable_filters_and_join() {
        let db = store();
        seed_user(&db, "u1");
        db.create_campaign(&CampaignDraft::new("u1", "live")).unwrap();
        let mut paused = CampaignDraft::new("u1", "paused");
        paused.is_paused = true;
        db.create_campaign(&paused).unwrap();
        let mut inactive = CampaignDraft::new("u1", "inactive");
        inactive.is_active = false;
        db.create_campaign(&inactive).unwrap();
        db.create_campaign(&CampaignDraft::new("ghost", "orphan")).unwrap();

        let rows = db.schedulable_campaigns().unwrap();
        assert_eq!(rows.len(), 2);
        let live = rows.iter().find(|r| r.campaign.name == "live").unwrap();
        assert_eq!(live.usage.unwrap().posts, UsageCounter::new(1, 10));
        let orphan = rows.iter().find(|r| r.campaign.name == "orphan").unwrap();
        assert!(orphan.usage.is_none());
    }

    #[test]
    fn test_pause_is_idempotent() {
        let db = store();
        let c = db.create_campaign(&CampaignDraft::new("u1", "main")).unwrap();
        let now = Utc::now();
        assert!(db.pause_campaign(&c.id, "bounce threshold", now).unwrap());
        assert!(!db.pause_campaign(&c.id, "complaint threshold", now).unwrap());
        let c = db.get_campaign(&c.id).unwrap().unwrap();
        assert!(c.is_paused);
        // First reason sticks.
        assert_eq!(c.pause_reason.as_deref(), Some("bounce threshold"));

        assert!(db.resume_campaign(&c.id).unwrap());
        assert!(!db.resume_campaign(&c.id).unwrap());
    }

    #[test]
    fn test_mark_dispatched_advances_only_that_kind() {
        let db = store();
        let mut draft = CampaignDraft::new("u1", "main");
        draft.post_cadence_hours = 6.0;
        let c = db.create_campaign(&draft).unwrap();
        let at = Utc::now();
        assert!(db.mark_dispatched(&c.id, ActionKind::Post, at).unwrap());
        let c = db.get_campaign(&c.id).unwrap().unwrap();
        let next = c.next_post_at.unwrap();
        assert!(((next - at).num_seconds() - 6 * 3600).abs() <= 1);
        // Video had no clock, so it is pinned at the dispatch time and stays due.
        assert_eq!(c.next_video_at.map(|t| t.timestamp()), Some(at.timestamp()));
        assert!(c.updated_at.is_some());
        assert!(!db.mark_dispatched("missing", ActionKind::Post, at).unwrap());
    }

    #[test]
    fn test_due_at_prefers_explicit_clock() {
        let db = store();
        let mut draft = CampaignDraft::new("u1", "main");
        draft.post_cadence_hours = 6.0;
        let updated = Utc::now() - Duration::hours(7);
        draft.updated_at = Some(updated);
        let mut c = db.create_campaign(&draft).unwrap();
        let DueAt::At(legacy) = c.due_at(ActionKind::Post) else {
            panic!("expected a legacy clock");
        };
        assert!(((legacy - updated).num_seconds() - 6 * 3600).abs() <= 1);

        let explicit = Utc::now() + Duration::hours(1);
        c.next_post_at = Some(explicit);
        assert_eq!(c.due_at(ActionKind::Post), DueAt::At(explicit));

        c.next_post_at = None;
        c.updated_at = None;
        assert_eq!(c.due_at(ActionKind::Post), DueAt::Now);
    }

    #[test]
    fn test_oversized_cadence_is_never_due() {
        let db = store();
        let mut draft = CampaignDraft::new("u1", "main");
        draft.post_cadence_hours = 1e13;
        draft.updated_at = Some(Utc::now() - Duration::hours(1));
        let c = db.create_campaign(&draft).unwrap();
        assert!(c.cadence(ActionKind::Post).is_none());
        assert_eq!(c.due_at(ActionKind::Post), DueAt::Never);
        assert!(!c.due_at(ActionKind::Post).elapsed(Utc::now()));

        // Recording a dispatch does not panic and leaves the clock unusable.
        assert!(db.mark_dispatched(&c.id, ActionKind::Post, Utc::now()).unwrap());
        let c = db.get_campaign(&c.id).unwrap().unwrap();
        assert!(c.next_post_at.is_none());
        assert_eq!(c.due_at(ActionKind::Post), DueAt::Never);
    }

    #[test]
    fn test_success_does_not_push_back_sibling_kinds() {
        let db = store();
        let mut draft = CampaignDraft::new("u1", "main");
        draft.video_cadence_hours = 72.0;
        let c = db.create_campaign(&draft).unwrap();
        let at = Utc::now();
        // Fresh campaign: video has no clock and is due now.
        assert_eq!(c.due_at(ActionKind::Video), DueAt::Now);

        assert!(db.mark_dispatched(&c.id, ActionKind::Post, at).unwrap());
        let c = db.get_campaign(&c.id).unwrap().unwrap();
        assert!(c.due_at(ActionKind::Video).elapsed(at + Duration::hours(1)));
        assert!(c.due_at(ActionKind::Outreach).elapsed(at + Duration::hours(1)));

        // A legacy clock mid-way keeps its original due time.
        let mut draft = CampaignDraft::new("u1", "legacy");
        draft.video_cadence_hours = 72.0;
        let updated = at - Duration::hours(70);
        draft.updated_at = Some(updated);
        let c = db.create_campaign(&draft).unwrap();
        assert!(db.mark_dispatched(&c.id, ActionKind::Post, at).unwrap());
        let c = db.get_campaign(&c.id).unwrap().unwrap();
        let video = c.next_video_at.unwrap();
        assert!(((video - updated).num_seconds() - 72 * 3600).abs() <= 1);
    }
}
