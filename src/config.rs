//! Configuration for the scheduler facade.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `tick_duration` | 100 |
//! | `time_unit` | milliseconds |
//! | `ticks_per_wheel` | 512 |
//!
//! # Environment Overrides
//!
//! Settings resolve programmatic values first, then `TICKWHEEL_*` environment
//! variables, then the defaults above:
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TICKWHEEL_TICK_DURATION` | `u64` | `tick_duration` |
//! | `TICKWHEEL_TIME_UNIT` | unit name | `time_unit` |
//! | `TICKWHEEL_TICKS_PER_WHEEL` | `usize` | `ticks_per_wheel` |

use std::time::Duration;

use serde::Deserialize;

use crate::clock::TimeUnit;
use crate::error::{ConfigError, MAX_TICKS_PER_WHEEL};

/// Environment variable name for the tick duration amount.
pub const ENV_TICK_DURATION: &str = "TICKWHEEL_TICK_DURATION";
/// Environment variable name for the tick duration unit.
pub const ENV_TIME_UNIT: &str = "TICKWHEEL_TIME_UNIT";
/// Environment variable name for the wheel width.
pub const ENV_TICKS_PER_WHEEL: &str = "TICKWHEEL_TICKS_PER_WHEEL";

/// Configuration keys for building a [`WheelScheduler`](crate::WheelScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Length of one wheel tick, in units of [`Self::time_unit`].
    pub tick_duration: u64,
    /// Unit for [`Self::tick_duration`].
    pub time_unit: TimeUnit,
    /// Requested number of wheel slots; rounded up to a power of two.
    pub ticks_per_wheel: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_duration: 100,
            time_unit: TimeUnit::Milliseconds,
            ticks_per_wheel: 512,
        }
    }
}

impl SchedulerConfig {
    /// Defaults plus any `TICKWHEEL_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `TICKWHEEL_*` environment overrides in place.
    ///
    /// Unset variables leave the corresponding field untouched. A set but
    /// unparseable variable is an error rather than a silent fallback.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_TICK_DURATION) {
            self.tick_duration = parse_u64(ENV_TICK_DURATION, &val)?;
        }
        if let Some(val) = read_env(ENV_TIME_UNIT) {
            self.time_unit = val.parse()?;
        }
        if let Some(val) = read_env(ENV_TICKS_PER_WHEEL) {
            self.ticks_per_wheel = parse_usize(ENV_TICKS_PER_WHEEL, &val)?;
        }
        Ok(())
    }

    /// Validates that every field is positive and in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_duration == 0 {
            return Err(ConfigError::ZeroTickDuration);
        }
        if self.ticks_per_wheel == 0 {
            return Err(ConfigError::ZeroTicksPerWheel);
        }
        if self.ticks_per_wheel > MAX_TICKS_PER_WHEEL {
            return Err(ConfigError::TicksPerWheelTooLarge {
                requested: self.ticks_per_wheel,
            });
        }
        Ok(())
    }

    /// The configured tick length as a [`Duration`].
    #[must_use]
    pub const fn tick(&self) -> Duration {
        self.time_unit.duration(self.tick_duration)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue {
            name,
            value: value.to_string(),
        })
}

fn parse_usize(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue {
            name,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that mutate process environment serialize through this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_documentation() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_duration, 100);
        assert_eq!(config.time_unit, TimeUnit::Milliseconds);
        assert_eq!(config.ticks_per_wheel, 512);
        assert_eq!(config.tick(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_fail_validation() {
        let mut config = SchedulerConfig::default();
        config.tick_duration = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTickDuration));

        let mut config = SchedulerConfig::default();
        config.ticks_per_wheel = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTicksPerWheel));
    }

    #[test]
    fn oversized_wheel_fails_validation() {
        let mut config = SchedulerConfig::default();
        config.ticks_per_wheel = MAX_TICKS_PER_WHEEL + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TicksPerWheelTooLarge { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_TICK_DURATION, "50");
        std::env::set_var(ENV_TIME_UNIT, "ms");
        std::env::set_var(ENV_TICKS_PER_WHEEL, "64");

        let config = SchedulerConfig::from_env().unwrap();
        assert_eq!(config.tick_duration, 50);
        assert_eq!(config.time_unit, TimeUnit::Milliseconds);
        assert_eq!(config.ticks_per_wheel, 64);

        std::env::remove_var(ENV_TICK_DURATION);
        std::env::remove_var(ENV_TIME_UNIT);
        std::env::remove_var(ENV_TICKS_PER_WHEEL);
    }

    #[test]
    fn unparseable_env_value_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_TICKS_PER_WHEEL, "many");
        let result = SchedulerConfig::from_env();
        std::env::remove_var(ENV_TICKS_PER_WHEEL);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvValue {
                name: ENV_TICKS_PER_WHEEL,
                ..
            })
        ));
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"tick_duration": 10}"#).unwrap();
        assert_eq!(config.tick_duration, 10);
        assert_eq!(config.ticks_per_wheel, 512);
    }
}
