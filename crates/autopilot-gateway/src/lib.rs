//! # AutoPilot Gateway
//!
//! HTTP surface for the autopilot: scheduler ticks, the dispatch gateway
//! the workflow engine consults before acting, signed delivery webhooks,
//! and session-authenticated campaign and activity endpoints.

pub mod authorize;
pub mod deliverability;
pub mod ledger;
pub mod routes;
pub mod server;
pub mod session;

pub use authorize::{AuthorizeRequest, DenyReason, DispatchDecision, ExecutionContext, SkipReason, authorize};
pub use deliverability::DeliverabilityMonitor;
pub use server::{AppState, build_router, start};
