//! Per-action admission control.
//!
//! The [`RateLimiter`] keeps a 24-hour ledger of successful actions and
//! per-type burst/cooldown bookkeeping. Decisions come from sliding windows
//! recomputed from the ledger on every check. State is snapshotted through a
//! [`SnapshotStore`] after each mutation; storage failures are logged and the
//! limiter keeps working from memory.

pub mod profile;
pub mod snapshot;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock, to_chrono, to_std};
use crate::error::Result;

pub use profile::{
    ActionType, RateLimitConfig, RateLimits, SafetyLevel, SafetyProfile, SessionPolicy,
};
pub use snapshot::{
    ActionRecord, ActionState, JsonSnapshotStore, LimiterSnapshot, MemorySnapshotStore,
    SnapshotStore,
};

use profile::uniform_secs;
use snapshot::RETENTION_HOURS;

/// Default ceiling for a single [`RateLimiter::wait_for_action`] wait.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30 * 60);

/// Slack added to every computed wait so the recheck lands past the boundary.
const WAIT_SLACK: Duration = Duration::from_secs(1);

/// Why an action may not run right now. Not an error: callers wait or move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    Cooldown { remaining: Duration },
    DailyLimit { count: u32, limit: u32, retry_in: Duration },
    HourlyLimit { count: u32, limit: u32, retry_in: Duration },
    TooSoon { wait: Duration },
}

impl Denial {
    /// How long until this particular condition stops holding.
    pub fn wait(&self) -> Duration {
        match self {
            Denial::Cooldown { remaining } => *remaining,
            Denial::DailyLimit { retry_in, .. } | Denial::HourlyLimit { retry_in, .. } => *retry_in,
            Denial::TooSoon { wait } => *wait,
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Cooldown { remaining } => {
                write!(f, "in cooldown, {}s remaining", remaining.as_secs())
            }
            Denial::DailyLimit { count, limit, .. } => {
                write!(f, "daily limit reached ({count}/{limit})")
            }
            Denial::HourlyLimit { count, limit, .. } => {
                write!(f, "hourly limit reached ({count}/{limit})")
            }
            Denial::TooSoon { wait } => write!(f, "too soon, wait {}s", wait.as_secs()),
        }
    }
}

/// Result of [`RateLimiter::can_perform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn reason(&self) -> String {
        match self {
            Decision::Allowed => "ok".to_string(),
            Decision::Denied(denial) => denial.to_string(),
        }
    }
}

/// Point-in-time usage for one action type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionStats {
    pub action: ActionType,
    pub daily_count: u32,
    pub daily_limit: u32,
    pub daily_remaining: u32,
    pub hourly_count: u32,
    pub hourly_limit: u32,
    pub hourly_remaining: u32,
    pub burst_count: u32,
    pub burst_limit: u32,
    pub cooldown_remaining: Option<Duration>,
    pub last_action: Option<DateTime<Utc>>,
    pub since_last_action: Option<Duration>,
}

impl ActionStats {
    pub fn in_cooldown(&self) -> bool {
        self.cooldown_remaining.is_some()
    }
}

struct Inner {
    limits: RateLimits,
    actions: Vec<ActionRecord>,
    states: BTreeMap<ActionType, ActionState>,
    /// Bumped on every mutation; orders snapshots so an older one never overwrites a newer one.
    generation: u64,
}

impl Inner {
    fn state(&mut self, action: ActionType) -> &mut ActionState {
        self.states.entry(action).or_default()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - chrono::Duration::hours(RETENTION_HOURS);
        self.actions.retain(|record| record.timestamp > horizon);
    }

    /// Timestamps of `action` strictly after `since`, oldest first.
    fn counted(&self, action: ActionType, since: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut stamps: Vec<_> = self
            .actions
            .iter()
            .filter(|record| record.action == action && record.timestamp > since)
            .map(|record| record.timestamp)
            .collect();
        stamps.sort();
        stamps
    }

    fn snapshot(&mut self, now: DateTime<Utc>) -> (u64, LimiterSnapshot) {
        self.generation += 1;
        let snapshot = LimiterSnapshot {
            actions: self.actions.clone(),
            states: self.states.clone(),
            saved_at: now,
        };
        (self.generation, snapshot)
    }
}

/// Sliding-window admission controller. One instance per process, shared by reference.
pub struct RateLimiter<C: Clock = SystemClock> {
    clock: C,
    store: Box<dyn SnapshotStore>,
    inner: Mutex<Inner>,
    saved_generation: Mutex<u64>,
    rng: Mutex<StdRng>,
    max_wait: Duration,
}

impl RateLimiter<SystemClock> {
    pub fn open(limits: RateLimits, store: Box<dyn SnapshotStore>) -> Result<Self> {
        Self::with_clock(limits, store, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Validates `limits` and restores whatever usable state `store` holds.
    pub fn with_clock(limits: RateLimits, store: Box<dyn SnapshotStore>, clock: C) -> Result<Self> {
        limits.validate()?;
        let now = clock.now();

        let mut inner = Inner {
            limits,
            actions: Vec::new(),
            states: BTreeMap::new(),
            generation: 0,
        };

        match store.load() {
            Ok(Some(snapshot)) if snapshot.is_stale(now) => {
                warn!(saved_at = %snapshot.saved_at, "discarding stale limiter snapshot");
            }
            Ok(Some(snapshot)) => {
                inner.actions = snapshot.actions;
                inner.states = snapshot.states;
                inner.prune(now);
                for (action, state) in inner.states.iter_mut() {
                    let expired = state.cooldown_ends_at.is_none_or(|end| now >= end);
                    if state.in_cooldown && expired {
                        debug!(%action, "cooldown expired while offline");
                        state.clear_cooldown();
                    }
                }
                info!(records = inner.actions.len(), "restored limiter state");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "discarding unreadable limiter snapshot"),
        }

        Ok(Self {
            clock,
            store,
            inner: Mutex::new(inner),
            saved_generation: Mutex::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
            max_wait: DEFAULT_MAX_WAIT,
        })
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        *lock(&self.rng) = StdRng::seed_from_u64(seed);
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn limits(&self) -> RateLimits {
        lock(&self.inner).limits.clone()
    }

    /// Checks cooldown, daily cap, hourly cap and minimum spacing, in that order.
    /// An expired cooldown is cleared here, resetting the burst count.
    pub fn can_perform(&self, action: ActionType) -> Decision {
        let now = self.clock.now();
        let (decision, pending) = {
            let mut inner = lock(&self.inner);
            let config = inner.limits.get(action).clone();
            let mut pending = None;

            let state = inner.state(action);
            if state.in_cooldown {
                if let Some(end) = state.cooldown_ends_at
                    && now < end
                {
                    let remaining = to_std(end - now);
                    return Decision::Denied(Denial::Cooldown { remaining });
                }
                state.clear_cooldown();
                info!(%action, "cooldown over");
                pending = Some(inner.snapshot(now));
            }

            let decision = evaluate(&inner, &config, action, now);
            (decision, pending)
        };

        if let Some((generation, snapshot)) = pending {
            self.persist(generation, &snapshot);
        }
        decision
    }

    /// Appends to the ledger, advances the burst window and starts a cooldown
    /// if either the burst or the trailing-hour threshold is reached. When both
    /// fire, the longer cooldown wins.
    pub fn record_action(&self, action: ActionType) {
        let now = self.clock.now();
        let (generation, snapshot) = {
            let mut inner = lock(&self.inner);
            let config = inner.limits.get(action).clone();

            inner.actions.push(ActionRecord { timestamp: now, action });
            inner.prune(now);
            let hourly = inner.counted(action, now - chrono::Duration::hours(1)).len() as u32;

            let burst_window = to_chrono(config.burst_cooldown());
            let state = inner.state(action);
            state.last_action_time = Some(now);
            let window_expired = state
                .burst_window_start
                .is_none_or(|start| now - start > burst_window);
            if window_expired {
                state.burst_window_start = Some(now);
                state.burst_count = 0;
            }
            state.burst_count += 1;

            let burst_end = (state.burst_count >= config.burst_limit)
                .then(|| now + to_chrono(config.burst_cooldown()));
            let threshold_end = (hourly >= config.cooldown_threshold)
                .then(|| now + to_chrono(config.threshold_cooldown()));

            if let Some(end) = burst_end.into_iter().chain(threshold_end).max() {
                let end = match state.cooldown_ends_at {
                    Some(current) if state.in_cooldown => current.max(end),
                    _ => end,
                };
                state.in_cooldown = true;
                state.cooldown_ends_at = Some(end);
                info!(
                    %action,
                    burst = state.burst_count,
                    hourly,
                    seconds = to_std(end - now).as_secs(),
                    "entering cooldown"
                );
            }

            inner.snapshot(now)
        };

        self.persist(generation, &snapshot);
    }

    /// Waits until `action` is allowed. Returns `false` without waiting when
    /// the next wait would exceed the configured ceiling.
    pub async fn wait_for_action(&self, action: ActionType) -> bool {
        loop {
            let denial = match self.can_perform(action) {
                Decision::Allowed => return true,
                Decision::Denied(denial) => denial,
            };
            let wait = denial.wait() + WAIT_SLACK;
            if wait > self.max_wait {
                info!(%action, reason = %denial, wait_secs = wait.as_secs(), "wait exceeds ceiling");
                return false;
            }
            debug!(%action, reason = %denial, wait_secs = wait.as_secs(), "waiting");
            self.clock.sleep(wait).await;
        }
    }

    /// Uniform random spacing in `[min_interval, max_interval]`.
    pub fn recommended_delay(&self, action: ActionType) -> Duration {
        let (min, max) = {
            let inner = lock(&self.inner);
            let config = inner.limits.get(action);
            (config.min_interval_seconds, config.max_interval_seconds)
        };
        let secs = uniform_secs(&mut *lock(&self.rng), min, max);
        Duration::from_secs(secs)
    }

    /// Forgets everything about one action type, ledger records included.
    pub fn reset(&self, action: ActionType) {
        let now = self.clock.now();
        let (generation, snapshot) = {
            let mut inner = lock(&self.inner);
            inner.actions.retain(|record| record.action != action);
            inner.states.remove(&action);
            inner.snapshot(now)
        };
        info!(%action, "limiter state reset");
        self.persist(generation, &snapshot);
    }

    pub fn stats(&self, action: ActionType) -> ActionStats {
        let now = self.clock.now();
        let inner = lock(&self.inner);
        let config = inner.limits.get(action);
        let daily_count = inner.counted(action, now - chrono::Duration::hours(24)).len() as u32;
        let hourly_count = inner.counted(action, now - chrono::Duration::hours(1)).len() as u32;
        let state = inner.states.get(&action).cloned().unwrap_or_default();

        let cooldown_remaining = match (state.in_cooldown, state.cooldown_ends_at) {
            (true, Some(end)) if now < end => Some(to_std(end - now)),
            _ => None,
        };

        ActionStats {
            action,
            daily_count,
            daily_limit: config.daily_limit,
            daily_remaining: config.daily_limit.saturating_sub(daily_count),
            hourly_count,
            hourly_limit: config.hourly_limit,
            hourly_remaining: config.hourly_limit.saturating_sub(hourly_count),
            burst_count: state.burst_count,
            burst_limit: config.burst_limit,
            cooldown_remaining,
            last_action: state.last_action_time,
            since_last_action: state.last_action_time.map(|at| to_std(now - at)),
        }
    }

    /// Swaps the whole config table. The ledger and cooldowns are kept.
    pub fn apply_limits(&self, limits: RateLimits) -> Result<()> {
        limits.validate()?;
        lock(&self.inner).limits = limits;
        info!("rate limits updated");
        Ok(())
    }

    /// Persists the current state regardless of whether anything changed.
    pub fn flush(&self) {
        let now = self.clock.now();
        let (generation, snapshot) = lock(&self.inner).snapshot(now);
        self.persist(generation, &snapshot);
    }

    fn persist(&self, generation: u64, snapshot: &LimiterSnapshot) {
        let mut saved = lock(&self.saved_generation);
        if generation <= *saved {
            return;
        }
        match self.store.save(snapshot) {
            Ok(()) => *saved = generation,
            Err(e) => warn!(error = %e, "failed to persist limiter state; continuing in memory"),
        }
    }
}

/// Daily, hourly and spacing checks. Cooldown is handled by the caller.
fn evaluate(inner: &Inner, config: &RateLimitConfig, action: ActionType, now: DateTime<Utc>) -> Decision {
    let windows = [
        (chrono::Duration::hours(24), config.daily_limit, true),
        (chrono::Duration::hours(1), config.hourly_limit, false),
    ];
    for (window, limit, daily) in windows {
        let stamps = inner.counted(action, now - window);
        let count = stamps.len() as u32;
        if count >= limit {
            // The window admits again once enough of the oldest records age out.
            let index = (count - limit) as usize;
            let retry_in = to_std(stamps[index] + window - now);
            let denial = if daily {
                Denial::DailyLimit { count, limit, retry_in }
            } else {
                Denial::HourlyLimit { count, limit, retry_in }
            };
            return Decision::Denied(denial);
        }
    }

    if let Some(last) = inner.states.get(&action).and_then(|s| s.last_action_time) {
        let elapsed = now - last;
        let min = to_chrono(config.min_interval());
        if elapsed < min {
            return Decision::Denied(Denial::TooSoon { wait: to_std(min - elapsed) });
        }
    }

    Decision::Allowed
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
