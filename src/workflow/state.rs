use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PacerError, Result};
use crate::limiter::ActionType;

/// Opaque resumption context stored alongside a workflow.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// The kind of job a workflow runs. Each kind spends one [`ActionType`] quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Search,
    Connect,
    Message,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 3] = [WorkflowType::Search, WorkflowType::Connect, WorkflowType::Message];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Search => "search",
            WorkflowType::Connect => "connect",
            WorkflowType::Message => "message",
        }
    }

    pub fn action(&self) -> ActionType {
        match self {
            WorkflowType::Search => ActionType::Search,
            WorkflowType::Connect => ActionType::Connect,
            WorkflowType::Message => ActionType::Message,
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "search" => Ok(WorkflowType::Search),
            "connect" => Ok(WorkflowType::Connect),
            "message" => Ok(WorkflowType::Message),
            other => Err(PacerError::Storage(format!("unknown workflow type: {other}"))),
        }
    }
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// InProgress → {Paused, Completed, Failed} and Paused → InProgress. Nothing else.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (InProgress, Paused) | (InProgress, Completed) | (InProgress, Failed) | (Paused, InProgress)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(WorkflowStatus::InProgress),
            "paused" => Ok(WorkflowStatus::Paused),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            other => Err(PacerError::Storage(format!("unknown workflow status: {other}"))),
        }
    }
}

/// Resumable progress of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub current_step: String,
    pub current_index: u32,
    pub total_items: u32,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub metadata: Metadata,
}

impl WorkflowState {
    pub fn new(workflow_type: WorkflowType, total_items: u32, metadata: Metadata, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_type,
            status: WorkflowStatus::InProgress,
            current_step: String::new(),
            current_index: 0,
            total_items,
            started_at: now,
            paused_at: None,
            completed_at: None,
            error_message: None,
            metadata,
        }
    }

    /// Moves to `next`, stamping the matching timestamp. Illegal moves leave `self` untouched.
    pub fn transition(&mut self, next: WorkflowStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PacerError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        match next {
            WorkflowStatus::Paused => self.paused_at = Some(now),
            WorkflowStatus::InProgress => self.paused_at = None,
            WorkflowStatus::Completed | WorkflowStatus::Failed => self.completed_at = Some(now),
        }
        self.status = next;
        Ok(())
    }

    pub fn remaining(&self) -> u32 {
        self.total_items.saturating_sub(self.current_index)
    }

    pub fn is_resumable(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Backoff for system failures reported by the action executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts per item after a system failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Why a run stopped before or after exhausting its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Finished,
    OutsideHours,
    WaitCeiling,
    SessionLimit,
    TooManyFailures,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::Finished => "all items processed",
            StopReason::OutsideHours => "outside operating hours",
            StopReason::WaitCeiling => "rate limit wait too long",
            StopReason::SessionLimit => "session length reached",
            StopReason::TooManyFailures => "too many consecutive failures",
            StopReason::Shutdown => "shutdown requested",
        };
        f.write_str(label)
    }
}

/// Per-run tallies kept by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub succeeded: u32,
    pub rejected: u32,
    pub system_failures: u32,
}

/// Summary produced when a run ends, however it ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub stop_reason: StopReason,
    pub resumed_from: Option<u32>,
    pub current_index: u32,
    pub total_items: u32,
    pub counters: RunCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunReport {
    pub fn from_workflow(
        workflow: &WorkflowState,
        stop_reason: StopReason,
        resumed_from: Option<u32>,
        counters: RunCounters,
        run_started: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            workflow_type: workflow.workflow_type,
            status: workflow.status,
            stop_reason,
            resumed_from,
            current_index: workflow.current_index,
            total_items: workflow.total_items,
            counters,
            started_at: run_started,
            finished_at: now,
            duration_ms: (now - run_started).num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow() -> WorkflowState {
        WorkflowState::new(WorkflowType::Connect, 10, Metadata::new(), Utc::now())
    }

    #[test]
    fn new_workflow_starts_in_progress() {
        let wf = workflow();
        assert_eq!(wf.status, WorkflowStatus::InProgress);
        assert_eq!(wf.current_index, 0);
        assert!(Uuid::parse_str(&wf.id).is_ok());
        assert_eq!(wf.remaining(), 10);
    }

    #[test]
    fn legal_transitions() {
        use WorkflowStatus::*;
        assert!(InProgress.can_transition_to(Paused));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Paused.can_transition_to(InProgress));

        assert!(!Paused.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Failed));
        assert!(!InProgress.can_transition_to(InProgress));
        for terminal in [Completed, Failed] {
            for next in [InProgress, Paused, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn transition_stamps_timestamps() {
        let mut wf = workflow();
        let now = Utc::now();
        wf.transition(WorkflowStatus::Paused, now).unwrap();
        assert_eq!(wf.paused_at, Some(now));
        wf.transition(WorkflowStatus::InProgress, now).unwrap();
        assert!(wf.paused_at.is_none());
        wf.transition(WorkflowStatus::Completed, now).unwrap();
        assert_eq!(wf.completed_at, Some(now));
    }

    #[test]
    fn illegal_transition_leaves_state_untouched() {
        let mut wf = workflow();
        wf.transition(WorkflowStatus::Failed, Utc::now()).unwrap();
        let err = wf.transition(WorkflowStatus::InProgress, Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid workflow transition from failed to in_progress");
        assert_eq!(wf.status, WorkflowStatus::Failed);
    }

    #[test]
    fn status_parses_its_own_labels() {
        for status in [
            WorkflowStatus::InProgress,
            WorkflowStatus::Paused,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
        assert!("running".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn workflow_type_maps_to_action() {
        assert_eq!(WorkflowType::Message.action(), ActionType::Message);
        assert_eq!("search".parse::<WorkflowType>().unwrap(), WorkflowType::Search);
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn run_report_from_workflow() {
        let mut wf = workflow();
        wf.current_index = 4;
        let started = wf.started_at;
        let finished = started + chrono::Duration::seconds(90);
        let counters = RunCounters {
            succeeded: 3,
            rejected: 1,
            system_failures: 0,
        };
        let report =
            RunReport::from_workflow(&wf, StopReason::SessionLimit, Some(1), counters, started, finished);
        assert_eq!(report.workflow_id, wf.id);
        assert_eq!(report.current_index, 4);
        assert_eq!(report.duration_ms, 90_000);
        assert_eq!(report.stop_reason.to_string(), "session length reached");
    }
}
