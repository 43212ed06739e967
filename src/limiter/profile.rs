use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PacerError, Result};

/// An independently quota'd class of externally visible action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Connect,
    Message,
    Search,
}

impl ActionType {
    pub const ALL: [ActionType; 3] = [ActionType::Connect, ActionType::Message, ActionType::Search];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Connect => "connect",
            ActionType::Message => "message",
            ActionType::Search => "search",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota and spacing rules for one [`ActionType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Cap on actions in the trailing 24 hours.
    pub daily_limit: u32,
    /// Cap on actions in the trailing hour.
    pub hourly_limit: u32,
    /// Minimum spacing enforced by `can_perform`, and lower bound of the recommended delay.
    pub min_interval_seconds: u64,
    /// Upper bound of the recommended delay.
    pub max_interval_seconds: u64,
    /// Actions allowed in one burst before a forced cooldown.
    pub burst_limit: u32,
    /// Cooldown after a burst; also the length of the burst window.
    pub burst_cooldown_seconds: u64,
    /// Actions within a rolling hour that force a cooldown.
    pub cooldown_threshold: u32,
    /// Length of the threshold cooldown.
    pub cooldown_minutes: u64,
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_seconds)
    }

    pub fn burst_cooldown(&self) -> Duration {
        Duration::from_secs(self.burst_cooldown_seconds)
    }

    pub fn threshold_cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes.saturating_mul(60))
    }

    pub fn validate(&self, action: ActionType) -> Result<()> {
        if self.min_interval_seconds > self.max_interval_seconds {
            return Err(PacerError::Config(format!(
                "{action}: min_interval_seconds ({}) exceeds max_interval_seconds ({})",
                self.min_interval_seconds, self.max_interval_seconds
            )));
        }
        if self.burst_limit < 1 {
            return Err(PacerError::Config(format!("{action}: burst_limit must be at least 1")));
        }
        if self.daily_limit < 1 || self.hourly_limit < 1 {
            return Err(PacerError::Config(format!(
                "{action}: daily_limit and hourly_limit must be at least 1"
            )));
        }
        if self.cooldown_threshold < 1 {
            return Err(PacerError::Config(format!("{action}: cooldown_threshold must be at least 1")));
        }
        Ok(())
    }
}

/// One [`RateLimitConfig`] per [`ActionType`]. Lookups are exhaustive, so a
/// missing entry cannot happen at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub connect: RateLimitConfig,
    pub message: RateLimitConfig,
    pub search: RateLimitConfig,
}

impl RateLimits {
    pub fn get(&self, action: ActionType) -> &RateLimitConfig {
        match action {
            ActionType::Connect => &self.connect,
            ActionType::Message => &self.message,
            ActionType::Search => &self.search,
        }
    }

    pub fn set(&mut self, action: ActionType, config: RateLimitConfig) {
        match action {
            ActionType::Connect => self.connect = config,
            ActionType::Message => self.message = config,
            ActionType::Search => self.search = config,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for action in ActionType::ALL {
            self.get(action).validate(action)?;
        }
        Ok(())
    }
}

/// Named aggressiveness preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// For accounts that are already at risk.
    UltraConservative,
    #[default]
    Conservative,
    Moderate,
    /// High risk, not recommended.
    Aggressive,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::UltraConservative => "ultra_conservative",
            SafetyLevel::Conservative => "conservative",
            SafetyLevel::Moderate => "moderate",
            SafetyLevel::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyLevel {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ultra_conservative" => Ok(SafetyLevel::UltraConservative),
            "conservative" => Ok(SafetyLevel::Conservative),
            "moderate" => Ok(SafetyLevel::Moderate),
            "aggressive" => Ok(SafetyLevel::Aggressive),
            other => Err(PacerError::Config(format!("unknown safety level: {other}"))),
        }
    }
}

/// Session-level pacing carried by a safety level: how long one run may last
/// and how often it rests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub max_session_minutes: u64,
    pub break_after_actions: u32,
    pub break_min_seconds: u64,
    pub break_max_seconds: u64,
}

impl SessionPolicy {
    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_minutes.saturating_mul(60))
    }

    pub fn random_break(&self, rng: &mut impl Rng) -> Duration {
        Duration::from_secs(uniform_secs(rng, self.break_min_seconds, self.break_max_seconds))
    }
}

/// Everything a safety level resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyProfile {
    pub level: SafetyLevel,
    pub limits: RateLimits,
    pub session: SessionPolicy,
}

impl SafetyProfile {
    pub fn for_level(level: SafetyLevel) -> Self {
        // (daily, hourly, min s, max s) per action, then burst, burst cooldown s,
        // session minutes, break after, break min s, break max s.
        let (connect, message, search, burst, cooldown, session, every, brk_min, brk_max) =
            match level {
                SafetyLevel::UltraConservative => (
                    (5, 2, 60, 180),
                    (3, 1, 45, 120),
                    (10, 3, 10, 30),
                    3,
                    600,
                    60,
                    5,
                    120,
                    300,
                ),
                SafetyLevel::Conservative => (
                    (10, 3, 30, 90),
                    (3, 1, 30, 60),
                    (15, 5, 5, 20),
                    5,
                    300,
                    90,
                    8,
                    60,
                    180,
                ),
                SafetyLevel::Moderate => (
                    (15, 4, 20, 60),
                    (8, 3, 20, 45),
                    (20, 6, 3, 15),
                    8,
                    180,
                    120,
                    12,
                    30,
                    90,
                ),
                SafetyLevel::Aggressive => (
                    (25, 6, 10, 30),
                    (10, 5, 10, 30),
                    (30, 10, 2, 10),
                    12,
                    120,
                    180,
                    20,
                    15,
                    45,
                ),
            };

        let build = |(daily, hourly, min, max): (u32, u32, u64, u64)| RateLimitConfig {
            daily_limit: daily,
            hourly_limit: hourly,
            min_interval_seconds: min,
            max_interval_seconds: max,
            burst_limit: burst,
            burst_cooldown_seconds: cooldown,
            cooldown_threshold: daily,
            cooldown_minutes: cooldown / 60,
        };

        Self {
            level,
            limits: RateLimits {
                connect: build(connect),
                message: build(message),
                search: build(search),
            },
            session: SessionPolicy {
                max_session_minutes: session,
                break_after_actions: every,
                break_min_seconds: brk_min,
                break_max_seconds: brk_max,
            },
        }
    }
}

pub(crate) fn uniform_secs(rng: &mut impl Rng, min: u64, max: u64) -> u64 {
    if min >= max {
        min
    } else {
        rng.gen_range(min..=max)
    }
}
