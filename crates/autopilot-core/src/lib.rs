//! # AutoPilot Core
//!
//! Shared vocabulary for the AutoPilot control loop: action kinds and usage
//! headroom, the platform alias tables, the outreach lead lifecycle,
//! configuration and the error type every other crate returns.

pub mod action;
pub mod config;
pub mod error;
pub mod lead;
pub mod platform;
pub mod time;

pub use action::{ActionKind, Headroom, UsageCounter, UsageCounters};
pub use config::AutopilotConfig;
pub use error::{AutopilotError, Result};
pub use lead::{DeliveryEvent, LeadStatus};
pub use platform::Platform;
