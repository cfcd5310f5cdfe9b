//! Outreach lead lifecycle.
//!
//! ```text
//! pending → sent → delivered → opened → clicked
//!    └──────┴─────────┴──────────┴────────┴──→ bounced       (absorbing)
//!    └──────┴─────────┴──────────┴────────┴──→ unsubscribed  (absorbing)
//! ```
//!
//! Progress events only ever move a lead forward; a late `delivered` after
//! `opened` is a no-op. Complaints land on `unsubscribed`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AutopilotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Unsubscribed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Bounced => "bounced",
            Self::Unsubscribed => "unsubscribed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Bounced | Self::Unsubscribed)
    }

    /// Position along the progress path. Terminal states have none.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Opened => Some(3),
            Self::Clicked => Some(4),
            Self::Bounced | Self::Unsubscribed => None,
        }
    }

    /// Apply an event. Returns the new status, or `None` when the event does
    /// not move this lead.
    pub fn apply(self, event: &DeliveryEvent) -> Option<LeadStatus> {
        if self.is_terminal() {
            return None;
        }
        let target = match event {
            DeliveryEvent::Sent => LeadStatus::Sent,
            DeliveryEvent::Delivered => LeadStatus::Delivered,
            DeliveryEvent::Opened => LeadStatus::Opened,
            DeliveryEvent::Clicked => LeadStatus::Clicked,
            DeliveryEvent::Bounced => return Some(LeadStatus::Bounced),
            DeliveryEvent::Complained | DeliveryEvent::Unsubscribed => {
                return Some(LeadStatus::Unsubscribed);
            }
            DeliveryEvent::Unknown(_) => return None,
        };
        match (self.rank(), target.rank()) {
            (Some(from), Some(to)) if to > from => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = AutopilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "opened" => Self::Opened,
            "clicked" => Self::Clicked,
            "bounced" => Self::Bounced,
            "unsubscribed" => Self::Unsubscribed,
            other => return Err(AutopilotError::Invalid(format!("unknown lead status '{other}'"))),
        })
    }
}

/// An inbound delivery event, mapped from the provider's type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
    /// Anything we do not act on (including `delivery_delayed`).
    Unknown(String),
}

impl DeliveryEvent {
    /// Map a provider event type. Accepts both `email.bounced` and `bounced`.
    pub fn from_type(raw: &str) -> Self {
        let name = raw.trim().to_ascii_lowercase();
        let name = name.strip_prefix("email.").unwrap_or(&name);
        match name {
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "opened" => Self::Opened,
            "clicked" => Self::Clicked,
            "bounced" => Self::Bounced,
            "complained" => Self::Complained,
            "unsubscribed" => Self::Unsubscribed,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    /// Events that can push a campaign over a safety threshold.
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Bounced | Self::Complained | Self::Unsubscribed)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Lead column stamped when this event is applied.
    pub fn timestamp_column(&self) -> Option<&'static str> {
        match self {
            Self::Sent => Some("sent_at"),
            Self::Delivered => Some("delivered_at"),
            Self::Opened => Some("opened_at"),
            Self::Clicked => Some("clicked_at"),
            Self::Bounced => Some("bounced_at"),
            Self::Complained => Some("complained_at"),
            Self::Unsubscribed => Some("unsubscribed_at"),
            Self::Unknown(_) => None,
        }
    }
}
