//! Error types for timer construction and submission.
//!
//! Construction problems surface as [`ConfigError`] and fail the constructor;
//! submission problems surface as [`TimerError`] and fail the submitting call.
//! Failures raised by user task bodies are not errors at this level: they are
//! contained on the worker and reported through the task failure hook (see
//! [`crate::task::TaskFailure`]).

use thiserror::Error;

/// Largest accepted `ticks_per_wheel` before power-of-two rounding.
pub const MAX_TICKS_PER_WHEEL: usize = 1 << 30;

/// Invalid configuration detected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `tick_duration` was zero.
    #[error("tick duration must be positive")]
    ZeroTickDuration,

    /// `tick_duration` does not fit the wheel's nanosecond arithmetic.
    #[error("tick duration {0:?} is too large")]
    TickDurationTooLarge(std::time::Duration),

    /// `ticks_per_wheel` was zero.
    #[error("ticks per wheel must be positive")]
    ZeroTicksPerWheel,

    /// `ticks_per_wheel` exceeded [`MAX_TICKS_PER_WHEEL`].
    #[error("ticks per wheel {requested} exceeds the maximum of {MAX_TICKS_PER_WHEEL}")]
    TicksPerWheelTooLarge {
        /// The requested wheel width.
        requested: usize,
    },

    /// An environment override contained an unparseable value.
    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnvValue {
        /// The environment variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Errors returned by submission-side operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The timer was shut down; no further submissions are accepted.
    #[error("timer has been shut down")]
    ShutDown,

    /// The scheduler was given a zero delay or period.
    #[error("delay and period must be positive")]
    InvalidDelay,

    /// Construction failed while building a timer from configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
