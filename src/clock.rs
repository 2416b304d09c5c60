//! Time units and the monotonic clock.
//!
//! All wheel arithmetic runs on `u64` nanosecond readings taken from a
//! [`MonotonicClock`], which is anchored to a [`Instant`] captured when the
//! timer is constructed. Wall-clock adjustments are invisible to the wheel.

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::ConfigError;

/// Granularity for configured durations.
///
/// Used by [`SchedulerConfig`](crate::config::SchedulerConfig) to interpret
/// the `tick_duration` amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
}

impl TimeUnit {
    /// Converts `amount` of this unit into a [`Duration`].
    #[must_use]
    pub const fn duration(self, amount: u64) -> Duration {
        match self {
            Self::Nanoseconds => Duration::from_nanos(amount),
            Self::Microseconds => Duration::from_micros(amount),
            Self::Milliseconds => Duration::from_millis(amount),
            Self::Seconds => Duration::from_secs(amount),
            Self::Minutes => Duration::from_secs(amount * 60),
        }
    }

    /// The canonical lowercase name, as accepted by configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nanoseconds => "nanoseconds",
            Self::Microseconds => "microseconds",
            Self::Milliseconds => "milliseconds",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanos" | "nanoseconds" => Ok(Self::Nanoseconds),
            "us" | "micros" | "microseconds" => Ok(Self::Microseconds),
            "ms" | "millis" | "milliseconds" => Ok(Self::Milliseconds),
            "s" | "secs" | "seconds" => Ok(Self::Seconds),
            "m" | "min" | "minutes" => Ok(Self::Minutes),
            other => Err(ConfigError::InvalidEnvValue {
                name: crate::config::ENV_TIME_UNIT,
                value: other.to_string(),
            }),
        }
    }
}

/// Monotonic nanosecond clock anchored at construction.
///
/// Readings are nanoseconds elapsed since the anchor and therefore start
/// near zero, which keeps all downstream offset arithmetic comfortably inside
/// `u64` for centuries of uptime.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the anchor.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        // Saturating: u64 nanoseconds cover ~584 years of uptime.
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
