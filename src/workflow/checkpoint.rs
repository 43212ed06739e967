//! Resumable workflow bookkeeping.
//!
//! [`CheckpointManager`] is the only writer of workflow records. It tracks
//! which workflows this process is running so that [`CheckpointManager::shutdown`]
//! can pause all of them before any shutdown callback runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use super::state::{Metadata, WorkflowState, WorkflowStatus, WorkflowType};
use super::store::{WorkflowFilter, WorkflowStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{PacerError, Result};

/// Error message stamped on paused workflows that are abandoned by hand.
pub const MANUALLY_CLEARED: &str = "manually_cleared";

type ShutdownCallback = Box<dyn FnOnce() + Send>;

pub struct CheckpointManager<C: Clock = SystemClock> {
    store: Arc<dyn WorkflowStore>,
    clock: C,
    active: Mutex<HashMap<String, WorkflowState>>,
    callbacks: Mutex<Vec<ShutdownCallback>>,
}

impl CheckpointManager<SystemClock> {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<C: Clock> CheckpointManager<C> {
    pub fn with_clock(store: Arc<dyn WorkflowStore>, clock: C) -> Self {
        Self {
            store,
            clock,
            active: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Creates and persists a new InProgress workflow at index 0.
    pub fn start_workflow(&self, workflow_type: WorkflowType, total_items: u32, metadata: Metadata) -> WorkflowState {
        let workflow = WorkflowState::new(workflow_type, total_items, metadata, self.clock.now());
        let mut active = lock(&self.active);
        self.persist(&workflow);
        active.insert(workflow.id.clone(), workflow.clone());
        drop(active);
        info!(id = %workflow.id, %workflow_type, total_items, "workflow started");
        workflow
    }

    /// Overwrites the progress cursor. Cheap enough to call after every item.
    pub fn update_progress(&self, id: &str, current_index: u32, current_step: &str) -> Result<WorkflowState> {
        self.modify(id, |wf, _| {
            wf.current_index = current_index;
            wf.current_step = current_step.to_string();
            Ok(())
        })
    }

    pub fn complete_workflow(&self, id: &str) -> Result<WorkflowState> {
        let wf = self.modify(id, |wf, now| wf.transition(WorkflowStatus::Completed, now))?;
        info!(%id, "workflow completed");
        Ok(wf)
    }

    pub fn fail_workflow(&self, id: &str, message: &str) -> Result<WorkflowState> {
        let wf = self.modify(id, |wf, now| {
            wf.transition(WorkflowStatus::Failed, now)?;
            wf.error_message = Some(message.to_string());
            Ok(())
        })?;
        warn!(%id, error = message, "workflow failed");
        Ok(wf)
    }

    pub fn pause_workflow(&self, id: &str) -> Result<WorkflowState> {
        let wf = self.modify(id, |wf, now| wf.transition(WorkflowStatus::Paused, now))?;
        info!(%id, index = wf.current_index, "workflow paused");
        Ok(wf)
    }

    /// Pauses every workflow this process is running. Returns how many were paused.
    ///
    /// Holds the active set for the whole pass, so an update in flight either
    /// lands before the pause or finds the record already paused.
    pub fn pause_all_workflows(&self) -> usize {
        let now = self.clock.now();
        let mut active = lock(&self.active);
        let mut paused = 0;
        for (_, mut wf) in active.drain() {
            if wf.transition(WorkflowStatus::Paused, now).is_err() {
                continue;
            }
            self.persist(&wf);
            info!(id = %wf.id, index = wf.current_index, "workflow paused for shutdown");
            paused += 1;
        }
        paused
    }

    /// Most recent Paused or InProgress workflow of `workflow_type`.
    pub fn get_resumable_workflow(&self, workflow_type: WorkflowType) -> Option<WorkflowState> {
        match self.store.find(&WorkflowFilter::resumable(workflow_type)) {
            Ok(found) => found.into_iter().next(),
            Err(e) => {
                warn!(error = %e, %workflow_type, "could not look up resumable workflows");
                None
            }
        }
    }

    /// Paused → InProgress, and tracked by this process again.
    pub fn resume_workflow(&self, id: &str) -> Result<WorkflowState> {
        let wf = self.modify(id, |wf, now| wf.transition(WorkflowStatus::InProgress, now))?;
        info!(%id, index = wf.current_index, "workflow resumed");
        Ok(wf)
    }

    /// Takes ownership of a record left InProgress by a process that did not exit cleanly.
    pub fn adopt_workflow(&self, id: &str) -> Result<WorkflowState> {
        let mut active = lock(&self.active);
        let wf = self.load(&active, id)?;
        if wf.status != WorkflowStatus::InProgress {
            return Err(PacerError::InvalidTransition {
                from: wf.status.to_string(),
                to: WorkflowStatus::InProgress.to_string(),
            });
        }
        active.insert(wf.id.clone(), wf.clone());
        drop(active);
        info!(%id, index = wf.current_index, "adopted unfinished workflow");
        Ok(wf)
    }

    /// Fails every paused workflow of `workflow_type`. Returns how many were cleared.
    pub fn abandon_paused(&self, workflow_type: WorkflowType) -> usize {
        let filter = WorkflowFilter {
            workflow_type: Some(workflow_type),
            statuses: vec![WorkflowStatus::Paused],
            limit: None,
        };
        let paused = match self.store.find(&filter) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, %workflow_type, "could not list paused workflows");
                return 0;
            }
        };

        let now = self.clock.now();
        let mut active = lock(&self.active);
        let mut cleared = 0;
        for mut wf in paused {
            let failed = wf
                .transition(WorkflowStatus::InProgress, now)
                .and_then(|()| wf.transition(WorkflowStatus::Failed, now));
            if failed.is_err() {
                continue;
            }
            wf.error_message = Some(MANUALLY_CLEARED.to_string());
            self.persist(&wf);
            active.remove(&wf.id);
            cleared += 1;
        }
        drop(active);
        info!(%workflow_type, cleared, "paused workflows abandoned");
        cleared
    }

    /// All records, optionally of one type, newest first.
    pub fn list_workflows(&self, workflow_type: Option<WorkflowType>) -> Vec<WorkflowState> {
        let filter = WorkflowFilter {
            workflow_type,
            ..WorkflowFilter::default()
        };
        self.store.find(&filter).unwrap_or_else(|e| {
            warn!(error = %e, "could not list workflows");
            Vec::new()
        })
    }

    pub fn active_ids(&self) -> Vec<String> {
        lock(&self.active).keys().cloned().collect()
    }

    /// Registers work to run during [`shutdown`](Self::shutdown), after workflows are paused.
    pub fn on_shutdown(&self, callback: impl FnOnce() + Send + 'static) {
        lock(&self.callbacks).push(Box::new(callback));
    }

    /// Pauses every active workflow, then runs the shutdown callbacks once, in
    /// registration order. Returns how many workflows were paused.
    pub fn shutdown(&self) -> usize {
        let paused = self.pause_all_workflows();
        let callbacks: Vec<ShutdownCallback> = lock(&self.callbacks).drain(..).collect();
        for callback in callbacks {
            callback();
        }
        info!(paused, "state saved; resume on the next run");
        paused
    }

    /// Reads through the active set, which the caller already holds.
    fn load(&self, active: &HashMap<String, WorkflowState>, id: &str) -> Result<WorkflowState> {
        if let Some(wf) = active.get(id) {
            return Ok(wf.clone());
        }
        match self.store.get(id) {
            Ok(Some(wf)) => Ok(wf),
            Ok(None) => Err(PacerError::WorkflowNotFound(id.to_string())),
            Err(e) => {
                warn!(error = %e, %id, "could not load workflow");
                Err(PacerError::WorkflowNotFound(id.to_string()))
            }
        }
    }

    /// Applies `change` to a copy, persists it, and keeps the active map in step
    /// with the new status. A failed `change` leaves everything as it was.
    ///
    /// The active set stays locked from load to persist; a concurrent
    /// [`pause_all_workflows`](Self::pause_all_workflows) cannot be overwritten
    /// by a stale InProgress copy.
    fn modify<F>(&self, id: &str, change: F) -> Result<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState, chrono::DateTime<chrono::Utc>) -> Result<()>,
    {
        let mut active = lock(&self.active);
        let mut wf = self.load(&active, id)?;
        change(&mut wf, self.clock.now())?;
        self.persist(&wf);

        if wf.status == WorkflowStatus::InProgress {
            active.insert(wf.id.clone(), wf.clone());
        } else {
            active.remove(&wf.id);
        }
        Ok(wf)
    }

    fn persist(&self, wf: &WorkflowState) {
        if let Err(e) = self.store.save(wf) {
            warn!(error = %e, id = %wf.id, "failed to persist workflow; continuing in memory");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
