//! # AutoPilot Scheduler
//!
//! Decides which `(user, campaign, action)` pairs are due and hands each
//! one to the external workflow engine. A pass is stateless: it reads the
//! campaign store, never writes clocks, and tolerates overlapping runs.

pub mod dispatch;
pub mod due;
pub mod engine;

pub use dispatch::{DispatchRequest, HttpWorkflowDispatcher, WorkflowDispatcher};
pub use due::{DuePair, due_actions, is_kind_due};
pub use engine::{DispatchOutcome, PassSummary, run_pass, spawn_scheduler};
