//! Daily operating window with a lunch break and activity bursts.
//!
//! The window is jittered once per calendar day (host local time) and then
//! stays fixed until the date changes. Bursts and breaks layer on top of it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock, to_chrono, to_std};
use crate::error::{PacerError, Result};
use crate::limiter::profile::uniform_secs;

/// Chance that a break taken by [`Scheduler::take_break`] is a short one.
const SHORT_BREAK_SHARE: f64 = 0.3;
/// Upper bound of the random slack added after lunch.
const LUNCH_SLACK_SECS: u64 = 300;
/// Re-evaluation interval inside the operating window.
const POLL: Duration = Duration::from_secs(60);

/// Working-hours parameters. Hours are 24h local time; durations are minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    /// Start moves by up to this many minutes either way each day.
    #[serde(default = "default_variation")]
    pub start_variation_minutes: i64,
    #[serde(default = "default_variation")]
    pub end_variation_minutes: i64,
    #[serde(default = "default_work_days")]
    pub work_days: Vec<Weekday>,
    #[serde(default = "default_lunch_hour")]
    pub lunch_hour: u32,
    #[serde(default = "default_lunch_variation")]
    pub lunch_variation_minutes: i64,
    #[serde(default = "default_lunch_min")]
    pub lunch_min_minutes: u64,
    #[serde(default = "default_lunch_max")]
    pub lunch_max_minutes: u64,
    /// Continuous break probability; each check uses a tenth of it.
    #[serde(default = "default_short_break_chance")]
    pub short_break_chance: f64,
    #[serde(default = "default_short_break_min")]
    pub short_break_min_minutes: u64,
    #[serde(default = "default_short_break_max")]
    pub short_break_max_minutes: u64,
    #[serde(default = "default_burst_min")]
    pub burst_min_minutes: u64,
    #[serde(default = "default_burst_max")]
    pub burst_max_minutes: u64,
    #[serde(default = "default_gap_min")]
    pub burst_gap_min_minutes: u64,
    #[serde(default = "default_gap_max")]
    pub burst_gap_max_minutes: u64,
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    17
}

fn default_variation() -> i64 {
    30
}

fn default_work_days() -> Vec<Weekday> {
    vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
}

fn default_lunch_hour() -> u32 {
    12
}

fn default_lunch_variation() -> i64 {
    15
}

fn default_lunch_min() -> u64 {
    30
}

fn default_lunch_max() -> u64 {
    60
}

fn default_short_break_chance() -> f64 {
    0.15
}

fn default_short_break_min() -> u64 {
    5
}

fn default_short_break_max() -> u64 {
    15
}

fn default_burst_min() -> u64 {
    15
}

fn default_burst_max() -> u64 {
    45
}

fn default_gap_min() -> u64 {
    5
}

fn default_gap_max() -> u64 {
    20
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            start_variation_minutes: default_variation(),
            end_variation_minutes: default_variation(),
            work_days: default_work_days(),
            lunch_hour: default_lunch_hour(),
            lunch_variation_minutes: default_lunch_variation(),
            lunch_min_minutes: default_lunch_min(),
            lunch_max_minutes: default_lunch_max(),
            short_break_chance: default_short_break_chance(),
            short_break_min_minutes: default_short_break_min(),
            short_break_max_minutes: default_short_break_max(),
            burst_min_minutes: default_burst_min(),
            burst_max_minutes: default_burst_max(),
            burst_gap_min_minutes: default_gap_min(),
            burst_gap_max_minutes: default_gap_max(),
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(PacerError::Config(format!(
                "schedule: start_hour ({}) must be before end_hour ({}) within a day",
                self.start_hour, self.end_hour
            )));
        }
        if self.start_variation_minutes < 0
            || self.end_variation_minutes < 0
            || self.lunch_variation_minutes < 0
        {
            return Err(PacerError::Config("schedule: variations must not be negative".into()));
        }
        if !(0.0..=1.0).contains(&self.short_break_chance) {
            return Err(PacerError::Config(
                "schedule: short_break_chance must be between 0 and 1".into(),
            ));
        }
        let ranges = [
            ("lunch", self.lunch_min_minutes, self.lunch_max_minutes),
            ("short_break", self.short_break_min_minutes, self.short_break_max_minutes),
            ("burst", self.burst_min_minutes, self.burst_max_minutes),
            ("burst_gap", self.burst_gap_min_minutes, self.burst_gap_max_minutes),
        ];
        for (name, min, max) in ranges {
            if min > max {
                return Err(PacerError::Config(format!(
                    "schedule: {name} minimum ({min}) exceeds maximum ({max})"
                )));
            }
        }
        Ok(())
    }
}

/// Today's computed window plus the transient burst.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleState {
    pub day: NaiveDate,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub break_start: DateTime<Utc>,
    pub break_duration: Duration,
    pub burst_active: bool,
    pub burst_started: Option<DateTime<Utc>>,
    pub burst_duration: Duration,
}

impl ScheduleState {
    pub fn break_end(&self) -> DateTime<Utc> {
        self.break_start + to_chrono(self.break_duration)
    }
}

/// Where the scheduler's state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    NotStarted,
    Idle,
    Bursting,
    OnBreak,
    StoppedForDay,
}

impl fmt::Display for SchedulePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SchedulePhase::NotStarted => "not started",
            SchedulePhase::Idle => "idle",
            SchedulePhase::Bursting => "bursting",
            SchedulePhase::OnBreak => "on break",
            SchedulePhase::StoppedForDay => "stopped for the day",
        };
        f.write_str(label)
    }
}

pub struct Scheduler<C: Clock = SystemClock> {
    config: ScheduleConfig,
    clock: C,
    rng: StdRng,
    state: Option<ScheduleState>,
}

impl Scheduler<SystemClock> {
    pub fn new(config: ScheduleConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(config: ScheduleConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            rng: StdRng::from_entropy(),
            state: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Today's schedule, computing it first if the date has changed.
    pub fn today(&mut self) -> &ScheduleState {
        self.refresh()
    }

    pub fn is_work_day(&self) -> bool {
        let weekday = local_day(self.clock.now()).weekday();
        self.config.work_days.contains(&weekday)
    }

    /// Inside `[window_start, window_end]`.
    pub fn is_work_hours(&mut self) -> bool {
        let now = self.clock.now();
        let state = self.refresh();
        now >= state.window_start && now <= state.window_end
    }

    pub fn is_lunch_time(&mut self) -> bool {
        let now = self.clock.now();
        let state = self.refresh();
        now >= state.break_start && now < state.break_end()
    }

    pub fn can_operate(&mut self) -> bool {
        self.is_work_hours() && self.is_work_day() && !self.is_lunch_time()
    }

    /// Waits until operating is allowed. `false` means stop for today: the
    /// window has closed or today is not a work day.
    pub async fn wait_until_can_operate(&mut self) -> bool {
        loop {
            if self.can_operate() {
                return true;
            }
            if !self.is_work_day() {
                info!("not a work day, stopping");
                return false;
            }

            let now = self.clock.now();
            let (window_start, window_end, break_end) = {
                let state = self.refresh();
                (state.window_start, state.window_end, state.break_end())
            };

            if self.is_lunch_time() {
                let slack = Duration::from_secs(self.rng.gen_range(0..=LUNCH_SLACK_SECS));
                let wait = to_std(break_end - now) + slack;
                info!(minutes = wait.as_secs() / 60, "lunch break");
                self.clock.sleep(wait).await;
                continue;
            }

            if now < window_start {
                let wait = to_std(window_start - now);
                info!(minutes = wait.as_secs() / 60, "before working hours, waiting");
                self.clock.sleep(wait).await;
                continue;
            }

            if now > window_end {
                info!("after working hours, stopping for today");
                return false;
            }

            self.clock.sleep(POLL).await;
        }
    }

    pub fn start_burst(&mut self) {
        let minutes = uniform_secs(
            &mut self.rng,
            self.config.burst_min_minutes,
            self.config.burst_max_minutes,
        );
        let now = self.clock.now();
        let state = self.refresh();
        state.burst_active = true;
        state.burst_started = Some(now);
        state.burst_duration = Duration::from_secs(minutes.saturating_mul(60));
        info!(minutes, "starting activity burst");
    }

    /// True once the burst has run its course, or by small chance before that.
    pub fn should_take_break(&mut self) -> bool {
        let now = self.clock.now();
        // Unvalidated configs may carry any value; gen_bool only takes [0, 1].
        let chance = match self.config.short_break_chance / 10.0 {
            c if c.is_nan() => 0.0,
            c => c.clamp(0.0, 1.0),
        };
        let state = self.refresh();
        if !state.burst_active {
            return false;
        }
        let elapsed = state.burst_started.map(|at| to_std(now - at)).unwrap_or_default();
        if elapsed >= state.burst_duration {
            return true;
        }
        self.rng.gen_bool(chance)
    }

    /// Ends the burst and rests for a short break or a burst gap. Returns the rest taken.
    pub async fn take_break(&mut self) -> Duration {
        {
            let state = self.refresh();
            state.burst_active = false;
            state.burst_started = None;
            state.burst_duration = Duration::ZERO;
        }

        let (kind, min, max) = if self.rng.gen_bool(SHORT_BREAK_SHARE) {
            (
                "short break",
                self.config.short_break_min_minutes,
                self.config.short_break_max_minutes,
            )
        } else {
            (
                "resting between bursts",
                self.config.burst_gap_min_minutes,
                self.config.burst_gap_max_minutes,
            )
        };
        let minutes = uniform_secs(&mut self.rng, min, max);
        let rest = Duration::from_secs(minutes.saturating_mul(60));
        info!(minutes, "{kind}");
        self.clock.sleep(rest).await;
        rest
    }

    pub fn phase(&self) -> SchedulePhase {
        let now = self.clock.now();
        let Some(state) = self.state.as_ref().filter(|s| s.day == local_day(now)) else {
            return SchedulePhase::NotStarted;
        };
        if !self.is_work_day() || now > state.window_end {
            return SchedulePhase::StoppedForDay;
        }
        if now >= state.break_start && now < state.break_end() {
            return SchedulePhase::OnBreak;
        }
        if state.burst_active {
            SchedulePhase::Bursting
        } else {
            SchedulePhase::Idle
        }
    }

    fn refresh(&mut self) -> &mut ScheduleState {
        let day = local_day(self.clock.now());
        let state = match self.state.take() {
            Some(state) if state.day == day => state,
            _ => {
                let computed = self.compute(day);
                info!(
                    start = %computed.window_start.with_timezone(&Local).format("%H:%M"),
                    end = %computed.window_end.with_timezone(&Local).format("%H:%M"),
                    lunch = %computed.break_start.with_timezone(&Local).format("%H:%M"),
                    lunch_minutes = computed.break_duration.as_secs() / 60,
                    "today's schedule"
                );
                computed
            }
        };
        self.state.insert(state)
    }

    fn compute(&mut self, day: NaiveDate) -> ScheduleState {
        debug!(%day, "computing schedule");
        let midnight = local_midnight(day);
        let cfg = &self.config;
        let rng = &mut self.rng;

        let start = cfg.start_hour as i64 * 60 + jitter(rng, cfg.start_variation_minutes);
        let end = cfg.end_hour as i64 * 60 + jitter(rng, cfg.end_variation_minutes);
        let lunch = cfg.lunch_hour as i64 * 60 + jitter(rng, cfg.lunch_variation_minutes);
        let lunch_minutes = uniform_secs(rng, cfg.lunch_min_minutes, cfg.lunch_max_minutes);

        ScheduleState {
            day,
            window_start: midnight + minutes(start),
            window_end: midnight + minutes(end),
            break_start: midnight + minutes(lunch),
            break_duration: Duration::from_secs(lunch_minutes.saturating_mul(60)),
            burst_active: false,
            burst_started: None,
            burst_duration: Duration::ZERO,
        }
    }
}

fn jitter(rng: &mut StdRng, spread: i64) -> i64 {
    if spread <= 0 { 0 } else { rng.gen_range(-spread..=spread) }
}

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

fn local_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Start of `day` in local time. A midnight skipped by DST falls back to UTC.
fn local_midnight(day: NaiveDate) -> DateTime<Utc> {
    let naive = day.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}
