//! # AutoPilot Security
//!
//! Caller authentication for the system-to-system endpoints: static
//! pre-shared bearer secrets and Svix-style signed delivery webhooks.

pub mod secrets;
pub mod signature;

pub use secrets::{SecretCheck, SharedSecret, constant_time_eq, presented_secret};
pub use signature::{SignatureError, SignedHeaders, WebhookVerifier};
