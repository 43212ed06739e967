//! Admission control, operating-hours gating and resumable checkpoints for
//! long-running automation agents.
//!
//! The three core pieces are independent and shared by handle:
//! [`limiter::RateLimiter`] decides whether an action may run now,
//! [`schedule::Scheduler`] decides whether the agent should be working at all,
//! and [`workflow::CheckpointManager`] makes every job resumable.
//! [`orchestrator::Orchestrator`] wires them around an [`orchestrator::ActionExecutor`].

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod schedule;
pub mod ui;
pub mod workflow;
