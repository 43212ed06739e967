use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock, to_std};
use crate::error::{ExecutionError, Result};
use crate::limiter::{ActionType, RateLimiter, SessionPolicy};
use crate::schedule::{SchedulePhase, Scheduler};
use crate::workflow::{
    CheckpointManager, Metadata, RetryConfig, RunCounters, RunReport, ShutdownNotice, StopReason,
    WorkflowState, WorkflowStatus, WorkflowType,
};

/// Performs one externally visible action. The real implementation drives a browser.
pub trait ActionExecutor: Send + Sync {
    fn execute(
        &self,
        workflow_type: WorkflowType,
        item: &str,
    ) -> impl Future<Output = std::result::Result<(), ExecutionError>> + Send;
}

/// What to do with a workflow found InProgress at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncleanPolicy {
    /// Adopt it and continue from its cursor.
    #[default]
    Resume,
    /// Mark it failed and start a fresh workflow.
    Fail,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub respect_schedule: bool,
    pub unclean_policy: UncleanPolicy,
    /// Failed items in a row (after retries) before the workflow fails.
    pub max_consecutive_failures: u32,
    pub retry: RetryConfig,
    pub session: SessionPolicy,
}

/// Drives one batch of items through scheduler, limiter, executor and checkpoints.
pub struct Orchestrator<E: ActionExecutor, C: Clock + Clone = SystemClock> {
    limiter: Arc<RateLimiter<C>>,
    scheduler: Scheduler<C>,
    checkpoints: Arc<CheckpointManager<C>>,
    executor: E,
    options: RunOptions,
    shutdown: ShutdownNotice,
    clock: C,
    rng: StdRng,
}

/// How a single item ended.
enum ItemOutcome {
    Done,
    Rejected,
    Failed(ExecutionError),
    Stop(StopReason),
}

impl<E: ActionExecutor, C: Clock + Clone> Orchestrator<E, C> {
    pub fn new(
        limiter: Arc<RateLimiter<C>>,
        scheduler: Scheduler<C>,
        checkpoints: Arc<CheckpointManager<C>>,
        executor: E,
        options: RunOptions,
        shutdown: ShutdownNotice,
    ) -> Self {
        let clock = limiter.clock().clone();
        Self {
            limiter,
            scheduler,
            checkpoints,
            executor,
            options,
            shutdown,
            clock,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Runs `items` for `workflow_type`, resuming an earlier workflow of the same
    /// type when one exists. Always leaves the workflow Completed, Failed or Paused.
    pub async fn run_batch(
        &mut self,
        workflow_type: WorkflowType,
        items: &[String],
        metadata: Metadata,
    ) -> Result<RunReport> {
        let run_started = self.clock.now();
        let (mut workflow, resumed_from) = self.open_workflow(workflow_type, items, metadata)?;
        let action = workflow_type.action();
        let total = workflow.total_items.min(items.len() as u32);

        let mut counters = RunCounters::default();
        let mut consecutive_failures = 0;
        let mut since_break = 0;
        let mut index = workflow.current_index;

        let stop = loop {
            if index >= total {
                break StopReason::Finished;
            }
            if self.shutdown.is_requested() {
                break StopReason::Shutdown;
            }
            if to_std(self.clock.now() - run_started) >= self.options.session.max_session() {
                break StopReason::SessionLimit;
            }

            let item = &items[index as usize];
            match self.run_item(workflow_type, action, item).await {
                ItemOutcome::Stop(reason) => break reason,
                ItemOutcome::Done => {
                    counters.succeeded += 1;
                    consecutive_failures = 0;
                    since_break += 1;
                }
                ItemOutcome::Rejected => counters.rejected += 1,
                ItemOutcome::Failed(err) => {
                    counters.system_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= self.options.max_consecutive_failures {
                        workflow = self.checkpoints.fail_workflow(&workflow.id, &err.to_string())?;
                        break StopReason::TooManyFailures;
                    }
                }
            }

            index += 1;
            let step = format!("{action} {index}/{total}");
            workflow = self.checkpoints.update_progress(&workflow.id, index, &step)?;

            if index >= total {
                continue;
            }
            // Rests only start once the cursor is past the item just sent.
            if self.options.respect_schedule && self.scheduler.should_take_break() {
                let interrupted = tokio::select! {
                    _ = self.scheduler.take_break() => false,
                    _ = self.shutdown.requested() => true,
                };
                if interrupted {
                    break StopReason::Shutdown;
                }
            }
            if self.options.session.break_after_actions > 0
                && since_break >= self.options.session.break_after_actions
            {
                since_break = 0;
                let rest = self.options.session.random_break(&mut self.rng);
                info!(seconds = rest.as_secs(), "session break");
                if !self.rest(rest).await {
                    break StopReason::Shutdown;
                }
            }
            let delay = self.limiter.recommended_delay(action);
            debug!(seconds = delay.as_secs(), "spacing before next item");
            if !self.rest(delay).await {
                break StopReason::Shutdown;
            }
        };

        workflow = match stop {
            StopReason::Finished => self.checkpoints.complete_workflow(&workflow.id)?,
            StopReason::TooManyFailures => workflow,
            StopReason::Shutdown => {
                self.checkpoints.shutdown();
                self.checkpoints
                    .list_workflows(Some(workflow_type))
                    .into_iter()
                    .find(|wf| wf.id == workflow.id)
                    .unwrap_or(workflow)
            }
            StopReason::OutsideHours | StopReason::WaitCeiling | StopReason::SessionLimit => {
                self.checkpoints.pause_workflow(&workflow.id)?
            }
        };

        info!(
            id = %workflow.id,
            status = %workflow.status,
            reason = %stop,
            index = workflow.current_index,
            total = workflow.total_items,
            "run finished"
        );
        Ok(RunReport::from_workflow(
            &workflow,
            stop,
            resumed_from,
            counters,
            run_started,
            self.clock.now(),
        ))
    }

    /// Picks up a Paused workflow, settles an InProgress one per the unclean
    /// policy, or starts a new workflow.
    fn open_workflow(
        &self,
        workflow_type: WorkflowType,
        items: &[String],
        metadata: Metadata,
    ) -> Result<(WorkflowState, Option<u32>)> {
        if let Some(found) = self.checkpoints.get_resumable_workflow(workflow_type) {
            let resumed = match found.status {
                WorkflowStatus::Paused => Some(self.checkpoints.resume_workflow(&found.id)?),
                WorkflowStatus::InProgress => match self.options.unclean_policy {
                    UncleanPolicy::Resume => {
                        warn!(id = %found.id, "previous run did not exit cleanly; resuming it");
                        Some(self.checkpoints.adopt_workflow(&found.id)?)
                    }
                    UncleanPolicy::Fail => {
                        warn!(id = %found.id, "previous run did not exit cleanly; failing it");
                        self.checkpoints.fail_workflow(&found.id, "unclean shutdown")?;
                        None
                    }
                },
                WorkflowStatus::Completed | WorkflowStatus::Failed => None,
            };
            if let Some(workflow) = resumed {
                if workflow.total_items as usize != items.len() {
                    warn!(
                        stored = workflow.total_items,
                        given = items.len(),
                        "item count differs from the resumed workflow"
                    );
                }
                let from = workflow.current_index;
                return Ok((workflow, Some(from)));
            }
        }

        let workflow = self
            .checkpoints
            .start_workflow(workflow_type, items.len() as u32, metadata);
        Ok((workflow, None))
    }

    /// Gates on schedule and limiter, then executes with retries on system failure.
    async fn run_item(&mut self, workflow_type: WorkflowType, action: ActionType, item: &str) -> ItemOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(reason) = self.gate(action).await {
                return ItemOutcome::Stop(reason);
            }

            match self.executor.execute(workflow_type, item).await {
                Ok(()) => {
                    self.limiter.record_action(action);
                    return ItemOutcome::Done;
                }
                Err(err) if !err.is_system() => {
                    info!(%item, error = %err, "item skipped");
                    return ItemOutcome::Rejected;
                }
                Err(err) => {
                    if attempt > self.options.retry.max_retries {
                        warn!(%item, error = %err, attempts = attempt, "giving up on item");
                        return ItemOutcome::Failed(err);
                    }
                    let delay = self.options.retry.delay_for_attempt(attempt);
                    warn!(
                        %item,
                        error = %err,
                        "retry {attempt}/{} in {}ms",
                        self.options.retry.max_retries,
                        delay.as_millis()
                    );
                    if !self.rest(delay).await {
                        return ItemOutcome::Stop(StopReason::Shutdown);
                    }
                }
            }
        }
    }

    /// `None` when the action may run now; otherwise why the run must stop.
    async fn gate(&mut self, action: ActionType) -> Option<StopReason> {
        if self.options.respect_schedule {
            tokio::select! {
                open = self.scheduler.wait_until_can_operate() => {
                    if !open {
                        return Some(StopReason::OutsideHours);
                    }
                }
                _ = self.shutdown.requested() => return Some(StopReason::Shutdown),
            }
            if self.scheduler.phase() != SchedulePhase::Bursting {
                self.scheduler.start_burst();
            }
        }

        tokio::select! {
            allowed = self.limiter.wait_for_action(action) => {
                if !allowed {
                    return Some(StopReason::WaitCeiling);
                }
            }
            _ = self.shutdown.requested() => return Some(StopReason::Shutdown),
        }
        None
    }

    /// Sleeps unless shutdown arrives first. Returns `false` on shutdown.
    async fn rest(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.shutdown.is_requested();
        }
        tokio::select! {
            _ = self.clock.sleep(duration) => true,
            _ = self.shutdown.requested() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::limiter::{MemorySnapshotStore, RateLimitConfig, RateLimits};
    use crate::schedule::ScheduleConfig;
    use crate::workflow::{ShutdownTrigger, SqliteWorkflowStore, WorkflowStore, shutdown_channel};
    use chrono::{DateTime, Local, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockExecutor {
        script: Mutex<VecDeque<std::result::Result<(), ExecutionError>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockExecutor {
        fn ok() -> Self {
            Self::scripted(Vec::new())
        }

        fn scripted(script: Vec<std::result::Result<(), ExecutionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ActionExecutor for MockExecutor {
        async fn execute(
            &self,
            _workflow_type: WorkflowType,
            item: &str,
        ) -> std::result::Result<(), ExecutionError> {
            self.calls.lock().unwrap().push(item.to_string());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn local(hour: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2025, 6, 11, hour, 0, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn open_limits() -> RateLimits {
        let cfg = RateLimitConfig {
            daily_limit: 100,
            hourly_limit: 100,
            min_interval_seconds: 0,
            max_interval_seconds: 0,
            burst_limit: 100,
            burst_cooldown_seconds: 60,
            cooldown_threshold: 100,
            cooldown_minutes: 1,
        };
        RateLimits {
            connect: cfg.clone(),
            message: cfg.clone(),
            search: cfg,
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            respect_schedule: false,
            unclean_policy: UncleanPolicy::Resume,
            max_consecutive_failures: 3,
            retry: RetryConfig {
                max_retries: 0,
                base_delay_ms: 1000,
            },
            session: SessionPolicy {
                max_session_minutes: 600,
                break_after_actions: 0,
                break_min_seconds: 0,
                break_max_seconds: 0,
            },
        }
    }

    struct Harness {
        clock: ManualClock,
        limiter: Arc<RateLimiter<ManualClock>>,
        checkpoints: Arc<CheckpointManager<ManualClock>>,
        store: Arc<SqliteWorkflowStore>,
    }

    impl Harness {
        fn new(limits: RateLimits, at: DateTime<Utc>) -> Self {
            let clock = ManualClock::new(at);
            let limiter = Arc::new(
                RateLimiter::with_clock(limits, Box::new(MemorySnapshotStore::new()), clock.clone())
                    .unwrap(),
            );
            let store = Arc::new(SqliteWorkflowStore::open_in_memory().unwrap());
            let checkpoints = Arc::new(CheckpointManager::with_clock(store.clone(), clock.clone()));
            Self {
                clock,
                limiter,
                checkpoints,
                store,
            }
        }

        fn orchestrator<E: ActionExecutor>(
            &self,
            executor: E,
            options: RunOptions,
            shutdown: ShutdownNotice,
        ) -> Orchestrator<E, ManualClock> {
            let schedule = ScheduleConfig {
                start_variation_minutes: 0,
                end_variation_minutes: 0,
                lunch_variation_minutes: 0,
                short_break_chance: 0.0,
                burst_min_minutes: 600,
                burst_max_minutes: 600,
                ..ScheduleConfig::default()
            };
            let scheduler = Scheduler::with_clock(schedule, self.clock.clone()).with_seed(3);
            Orchestrator::new(
                self.limiter.clone(),
                scheduler,
                self.checkpoints.clone(),
                executor,
                options,
                shutdown,
            )
            .with_seed(5)
        }
    }

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{i}")).collect()
    }

    #[tokio::test]
    async fn processes_every_item_and_completes() {
        let h = Harness::new(open_limits(), local(10));
        let (_trigger, notice) = shutdown_channel();
        let executor = MockExecutor::ok();
        let calls = executor.calls.clone();
        let mut orch = h.orchestrator(executor, options(), notice);

        let report = orch.run_batch(WorkflowType::Connect, &items(3), Metadata::new()).await.unwrap();

        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.stop_reason, StopReason::Finished);
        assert_eq!(report.counters.succeeded, 3);
        assert_eq!(report.current_index, 3);
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(h.limiter.stats(ActionType::Connect).daily_count, 3);
        let stored = h.store.get(&report.workflow_id).unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn resumes_paused_workflow_from_its_cursor() {
        let h = Harness::new(open_limits(), local(10));
        let wf = h.checkpoints.start_workflow(WorkflowType::Message, 5, Metadata::new());
        h.checkpoints.update_progress(&wf.id, 2, "message 2/5").unwrap();
        h.checkpoints.pause_workflow(&wf.id).unwrap();

        let (_trigger, notice) = shutdown_channel();
        let executor = MockExecutor::ok();
        let calls = executor.calls.clone();
        let mut orch = h.orchestrator(executor, options(), notice);
        let report = orch.run_batch(WorkflowType::Message, &items(5), Metadata::new()).await.unwrap();

        assert_eq!(report.workflow_id, wf.id);
        assert_eq!(report.resumed_from, Some(2));
        assert_eq!(*calls.lock().unwrap(), vec!["item-2", "item-3", "item-4"]);
        assert_eq!(report.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn unclean_workflow_is_failed_under_fail_policy() {
        let h = Harness::new(open_limits(), local(10));
        let orphan = WorkflowState::new(WorkflowType::Search, 4, Metadata::new(), h.clock.now());
        h.store.save(&orphan).unwrap();

        let (_trigger, notice) = shutdown_channel();
        let mut opts = options();
        opts.unclean_policy = UncleanPolicy::Fail;
        let mut orch = h.orchestrator(MockExecutor::ok(), opts, notice);
        let report = orch.run_batch(WorkflowType::Search, &items(2), Metadata::new()).await.unwrap();

        assert_ne!(report.workflow_id, orphan.id);
        assert_eq!(report.resumed_from, None);
        let old = h.store.get(&orphan.id).unwrap().unwrap();
        assert_eq!(old.status, WorkflowStatus::Failed);
        assert_eq!(old.error_message.as_deref(), Some("unclean shutdown"));
    }

    #[tokio::test]
    async fn unclean_workflow_is_adopted_under_resume_policy() {
        let h = Harness::new(open_limits(), local(10));
        let mut orphan = WorkflowState::new(WorkflowType::Search, 3, Metadata::new(), h.clock.now());
        orphan.current_index = 1;
        h.store.save(&orphan).unwrap();

        let (_trigger, notice) = shutdown_channel();
        let mut orch = h.orchestrator(MockExecutor::ok(), options(), notice);
        let report = orch.run_batch(WorkflowType::Search, &items(3), Metadata::new()).await.unwrap();

        assert_eq!(report.workflow_id, orphan.id);
        assert_eq!(report.resumed_from, Some(1));
        assert_eq!(report.counters.succeeded, 2);
    }

    #[tokio::test]
    async fn rejected_items_are_skipped_without_spending_quota() {
        let h = Harness::new(open_limits(), local(10));
        let (_trigger, notice) = shutdown_channel();
        let executor = MockExecutor::scripted(vec![Err(ExecutionError::Rejected("already connected".into()))]);
        let mut orch = h.orchestrator(executor, options(), notice);
        let report = orch.run_batch(WorkflowType::Connect, &items(3), Metadata::new()).await.unwrap();

        assert_eq!(report.counters.rejected, 1);
        assert_eq!(report.counters.succeeded, 2);
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(h.limiter.stats(ActionType::Connect).daily_count, 2);
    }

    #[tokio::test]
    async fn repeated_system_failures_fail_the_workflow() {
        let h = Harness::new(open_limits(), local(10));
        let (_trigger, notice) = shutdown_channel();
        let failure = || Err(ExecutionError::System("navigation timeout".into()));
        let executor = MockExecutor::scripted(vec![failure(), failure(), failure(), failure()]);
        let mut opts = options();
        opts.retry.max_retries = 1;
        opts.max_consecutive_failures = 2;
        let mut orch = h.orchestrator(executor, opts, notice);

        let report = orch.run_batch(WorkflowType::Connect, &items(5), Metadata::new()).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::TooManyFailures);
        assert_eq!(report.status, WorkflowStatus::Failed);
        assert_eq!(report.counters.system_failures, 2);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(1)]);
        let stored = h.store.get(&report.workflow_id).unwrap().unwrap();
        assert!(stored.error_message.unwrap().contains("navigation timeout"));
    }

    #[tokio::test]
    async fn long_limiter_wait_pauses_the_workflow() {
        let mut limits = open_limits();
        limits.connect.daily_limit = 1;
        let h = Harness::new(limits, local(10));
        let (_trigger, notice) = shutdown_channel();
        let mut orch = h.orchestrator(MockExecutor::ok(), options(), notice);

        let report = orch.run_batch(WorkflowType::Connect, &items(3), Metadata::new()).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::WaitCeiling);
        assert_eq!(report.status, WorkflowStatus::Paused);
        assert_eq!(report.current_index, 1);
        let resumable = h.checkpoints.get_resumable_workflow(WorkflowType::Connect).unwrap();
        assert_eq!(resumable.current_index, 1);
    }

    #[tokio::test]
    async fn shutdown_request_pauses_and_runs_callbacks() {
        let h = Harness::new(open_limits(), local(10));
        let flushed = Arc::new(AtomicBool::new(false));
        let flag = flushed.clone();
        h.checkpoints.on_shutdown(move || flag.store(true, Ordering::SeqCst));

        let (trigger, notice) = shutdown_channel();
        trigger.trigger();
        let mut orch = h.orchestrator(MockExecutor::ok(), options(), notice);
        let report = orch.run_batch(WorkflowType::Message, &items(3), Metadata::new()).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Shutdown);
        assert_eq!(report.status, WorkflowStatus::Paused);
        assert!(flushed.load(Ordering::SeqCst));
        let stored = h.store.get(&report.workflow_id).unwrap().unwrap();
        assert!(stored.paused_at.is_some());
    }

    /// Succeeds and requests shutdown while the first item is in flight.
    struct ShutdownDuringExecute {
        trigger: ShutdownTrigger,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ActionExecutor for ShutdownDuringExecute {
        async fn execute(
            &self,
            _workflow_type: WorkflowType,
            item: &str,
        ) -> std::result::Result<(), ExecutionError> {
            self.calls.lock().unwrap().push(item.to_string());
            self.trigger.trigger();
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_during_burst_break_keeps_finished_item() {
        let h = Harness::new(open_limits(), local(10));
        let (trigger, notice) = shutdown_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = ShutdownDuringExecute {
            trigger,
            calls: calls.clone(),
        };
        let mut opts = options();
        opts.respect_schedule = true;
        let schedule = ScheduleConfig {
            start_variation_minutes: 0,
            end_variation_minutes: 0,
            lunch_variation_minutes: 0,
            short_break_chance: 0.0,
            burst_min_minutes: 0,
            burst_max_minutes: 0,
            ..ScheduleConfig::default()
        };
        let scheduler = Scheduler::with_clock(schedule, h.clock.clone()).with_seed(3);
        let mut orch = Orchestrator::new(
            h.limiter.clone(),
            scheduler,
            h.checkpoints.clone(),
            executor,
            opts,
            notice,
        );

        let report = orch.run_batch(WorkflowType::Connect, &items(3), Metadata::new()).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Shutdown);
        assert_eq!(*calls.lock().unwrap(), vec!["item-0"]);
        assert_eq!(h.limiter.stats(ActionType::Connect).daily_count, 1);
        let stored = h.store.get(&report.workflow_id).unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Paused);
        assert_eq!(stored.current_index, 1);
    }

    #[tokio::test]
    async fn shutdown_during_session_break_keeps_finished_items() {
        let h = Harness::new(open_limits(), local(10));
        let (trigger, notice) = shutdown_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = ShutdownDuringExecute {
            trigger,
            calls: calls.clone(),
        };
        let mut opts = options();
        opts.session.break_after_actions = 1;
        opts.session.break_min_seconds = 600;
        opts.session.break_max_seconds = 600;
        let mut orch = h.orchestrator(executor, opts, notice);

        let report = orch.run_batch(WorkflowType::Message, &items(4), Metadata::new()).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Shutdown);
        assert_eq!(report.current_index, 1);
        let resumable = h.checkpoints.get_resumable_workflow(WorkflowType::Message).unwrap();
        assert_eq!(resumable.status, WorkflowStatus::Paused);
        assert_eq!(resumable.current_index, 1);
    }

    #[tokio::test]
    async fn session_limit_stops_the_run() {
        let mut limits = open_limits();
        limits.search.min_interval_seconds = 40;
        limits.search.max_interval_seconds = 40;
        let h = Harness::new(limits, local(10));
        let (_trigger, notice) = shutdown_channel();
        let mut opts = options();
        opts.session.max_session_minutes = 1;
        let mut orch = h.orchestrator(MockExecutor::ok(), opts, notice);

        let report = orch.run_batch(WorkflowType::Search, &items(5), Metadata::new()).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::SessionLimit);
        assert_eq!(report.status, WorkflowStatus::Paused);
        assert_eq!(report.current_index, 2);
    }

    #[tokio::test]
    async fn takes_a_break_after_n_actions() {
        let h = Harness::new(open_limits(), local(10));
        let (_trigger, notice) = shutdown_channel();
        let mut opts = options();
        opts.session.break_after_actions = 2;
        opts.session.break_min_seconds = 90;
        opts.session.break_max_seconds = 90;
        let mut orch = h.orchestrator(MockExecutor::ok(), opts, notice);

        orch.run_batch(WorkflowType::Search, &items(3), Metadata::new()).await.unwrap();

        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(90)]);
    }

    #[tokio::test]
    async fn waits_for_working_hours_when_scheduled() {
        let h = Harness::new(open_limits(), local(7));
        let (_trigger, notice) = shutdown_channel();
        let mut opts = options();
        opts.respect_schedule = true;
        let mut orch = h.orchestrator(MockExecutor::ok(), opts, notice);

        let report = orch.run_batch(WorkflowType::Connect, &items(2), Metadata::new()).await.unwrap();

        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(h.clock.sleeps()[0], Duration::from_secs(2 * 3600));
    }

    #[tokio::test]
    async fn outside_hours_pauses_the_workflow() {
        let h = Harness::new(open_limits(), local(19));
        let (_trigger, notice) = shutdown_channel();
        let mut opts = options();
        opts.respect_schedule = true;
        let mut orch = h.orchestrator(MockExecutor::ok(), opts, notice);

        let report = orch.run_batch(WorkflowType::Connect, &items(2), Metadata::new()).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::OutsideHours);
        assert_eq!(report.status, WorkflowStatus::Paused);
        assert_eq!(report.counters.succeeded, 0);
    }
}
