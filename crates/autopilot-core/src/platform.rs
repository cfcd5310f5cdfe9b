//! Platform vocabulary and per-action resolution.
//!
//! Campaign toggles and connected-account records use loose names
//! ("youtube_shorts", "twitter_dm", "x"). Everything is normalized to a
//! canonical [`Platform`] before any membership test, so the intersection
//! below does not care which alias each side used.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::action::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    LinkedIn,
    Facebook,
    Instagram,
    TikTok,
    YouTube,
    Threads,
    Email,
}

/// Content-posting aliases → canonical platform.
const CONTENT_ALIASES: &[(&str, Platform)] = &[
    ("twitter", Platform::Twitter),
    ("x", Platform::Twitter),
    ("linkedin", Platform::LinkedIn),
    ("facebook", Platform::Facebook),
    ("fb", Platform::Facebook),
    ("instagram", Platform::Instagram),
    ("ig", Platform::Instagram),
    ("instagram_reels", Platform::Instagram),
    ("tiktok", Platform::TikTok),
    ("youtube", Platform::YouTube),
    ("youtube_shorts", Platform::YouTube),
    ("threads", Platform::Threads),
];

/// Outreach-channel aliases → canonical platform.
const OUTREACH_ALIASES: &[(&str, Platform)] = &[
    ("email", Platform::Email),
    ("gmail", Platform::Email),
    ("smtp", Platform::Email),
    ("twitter", Platform::Twitter),
    ("twitter_dm", Platform::Twitter),
    ("x_dm", Platform::Twitter),
    ("linkedin", Platform::LinkedIn),
    ("linkedin_dm", Platform::LinkedIn),
    ("linkedin_message", Platform::LinkedIn),
    ("instagram", Platform::Instagram),
    ("instagram_dm", Platform::Instagram),
    ("facebook", Platform::Facebook),
    ("facebook_messenger", Platform::Facebook),
];

const POST_ALLOW: &[Platform] = &[
    Platform::Twitter,
    Platform::LinkedIn,
    Platform::Facebook,
    Platform::Instagram,
    Platform::Threads,
];

const VIDEO_ALLOW: &[Platform] = &[
    Platform::TikTok,
    Platform::YouTube,
    Platform::Instagram,
    Platform::Facebook,
];

const OUTREACH_ALLOW: &[Platform] = &[
    Platform::Email,
    Platform::Twitter,
    Platform::LinkedIn,
    Platform::Instagram,
    Platform::Facebook,
];

fn lookup(table: &[(&str, Platform)], key: &str) -> Option<Platform> {
    let key = key.trim().to_ascii_lowercase();
    table.iter().find(|(alias, _)| *alias == key).map(|(_, p)| *p)
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::LinkedIn => "linkedin",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::TikTok => "tiktok",
            Self::YouTube => "youtube",
            Self::Threads => "threads",
            Self::Email => "email",
        }
    }

    /// Normalize a content-platform toggle key.
    pub fn from_content_key(key: &str) -> Option<Self> {
        lookup(CONTENT_ALIASES, key)
    }

    /// Normalize an outreach-channel toggle key.
    pub fn from_outreach_key(key: &str) -> Option<Self> {
        lookup(OUTREACH_ALIASES, key)
    }

    /// Normalize any known name, e.g. a connected-account record.
    pub fn normalize(key: &str) -> Option<Self> {
        Self::from_content_key(key).or_else(|| Self::from_outreach_key(key))
    }

    /// Platforms allowed to carry the given action kind.
    pub fn allowed_for(kind: ActionKind) -> &'static [Platform] {
        match kind {
            ActionKind::Post => POST_ALLOW,
            ActionKind::Video => VIDEO_ALLOW,
            ActionKind::Outreach => OUTREACH_ALLOW,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign platform toggles, keyed by whatever name the config used.
pub type PlatformToggles = BTreeMap<String, bool>;

/// Platforms enabled in a toggle set for a kind, normalized and filtered by
/// the kind's allow-list. Post/video read the content set, outreach reads
/// the outreach set.
pub fn enabled_for_kind(
    kind: ActionKind,
    content: &PlatformToggles,
    outreach: &PlatformToggles,
) -> BTreeSet<Platform> {
    let (toggles, normalize): (&PlatformToggles, fn(&str) -> Option<Platform>) = match kind {
        ActionKind::Post | ActionKind::Video => (content, Platform::from_content_key),
        ActionKind::Outreach => (outreach, Platform::from_outreach_key),
    };
    let allow = Platform::allowed_for(kind);
    toggles
        .iter()
        .filter(|(_, on)| **on)
        .filter_map(|(key, _)| normalize(key))
        .filter(|p| allow.contains(p))
        .collect()
}

/// Intersect the kind's enabled platforms with the user's active connections.
/// The result is sorted and free of duplicates.
pub fn resolve_platforms<S: AsRef<str>>(
    kind: ActionKind,
    content: &PlatformToggles,
    outreach: &PlatformToggles,
    connected: &[S],
) -> Vec<Platform> {
    let connected: BTreeSet<Platform> = connected
        .iter()
        .filter_map(|name| Platform::normalize(name.as_ref()))
        .collect();
    enabled_for_kind(kind, content, outreach)
        .intersection(&connected)
        .copied()
        .collect()
}
