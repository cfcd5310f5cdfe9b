//! Action kinds and usage headroom.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AutopilotError;

/// An automated action the AutoPilot can run for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Post,
    Video,
    Outreach,
}

impl ActionKind {
    /// Every kind, in evaluation order.
    pub const ALL: [ActionKind; 3] = [ActionKind::Post, ActionKind::Video, ActionKind::Outreach];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Video => "video",
            Self::Outreach => "outreach",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AutopilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" | "posts" => Ok(Self::Post),
            "video" | "videos" => Ok(Self::Video),
            "outreach" | "email" | "emails" => Ok(Self::Outreach),
            other => Err(AutopilotError::Invalid(format!("unknown action '{other}'"))),
        }
    }
}

/// One `{used, limit}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageCounter {
    pub used: i64,
    pub limit: i64,
}

impl UsageCounter {
    pub fn new(used: i64, limit: i64) -> Self {
        Self { used, limit }
    }

    /// `limit - used`; negative when the executor overshot.
    pub fn headroom(&self) -> i64 {
        self.limit - self.used
    }
}

/// Per-user consumption counters. Read-only from the core's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub posts: UsageCounter,
    pub videos: UsageCounter,
    pub emails: UsageCounter,
}

impl UsageCounters {
    pub fn counter(&self, kind: ActionKind) -> UsageCounter {
        match kind {
            ActionKind::Post => self.posts,
            ActionKind::Video => self.videos,
            ActionKind::Outreach => self.emails,
        }
    }

    pub fn headroom(&self, kind: ActionKind) -> i64 {
        self.counter(kind).headroom()
    }

    pub fn has_headroom(&self, kind: ActionKind) -> bool {
        self.headroom(kind) > 0
    }

    pub fn remaining(&self) -> Headroom {
        Headroom {
            posts: self.posts.headroom().max(0),
            videos: self.videos.headroom().max(0),
            emails: self.emails.headroom().max(0),
        }
    }
}

/// Remaining allowance per kind, as handed to the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headroom {
    pub posts: i64,
    pub videos: i64,
    pub emails: i64,
}
