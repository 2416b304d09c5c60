//! Tickwheel: a hashed timing wheel for large numbers of short-lived timers.
//!
//! # Overview
//!
//! A [`WheelTimer`] accepts timer submissions from any number of threads and
//! fires them, at most once each, on a single dedicated worker thread shortly
//! after their deadline. Insertion and cancellation are O(1) and never block
//! the submitter on timer-internal work: submitters only push onto lock-free
//! queues and flip per-timeout atomic state.
//!
//! The wheel trades precision for throughput. Timers are bucketed by tick
//! (100ms by default), so a timeout fires within one tick of its deadline,
//! never before it. This is the right shape for I/O timeouts, leases, and
//! retry backoff, where many timers are created and most are cancelled before
//! they fire.
//!
//! # Core Guarantees
//!
//! - **Exactly-once resolution**: a timeout transitions from `New` to exactly
//!   one of `Cancelled` or `Expired`; cancel and expire race through a single
//!   atomic compare-and-swap.
//! - **Never early**: a timeout's task never runs before its deadline.
//! - **Contained failures**: a task that fails or panics is reported to the
//!   configured failure hook and never disturbs the worker or its neighbors.
//! - **Non-blocking submission**: after the one-time lazy start, `submit`
//!   performs no locking and no wheel access.
//!
//! # Module Structure
//!
//! - [`wheel`]: the core timer — controller, timeout handles, buckets, worker
//! - [`scheduler`]: string-id facade with one-shot and fixed-rate jobs
//! - [`task`]: the task abstraction and failure hook
//! - [`config`]: configuration keys, defaults, and environment overrides
//! - [`clock`]: time units and the monotonic clock
//! - [`error`]: error types
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tickwheel::WheelTimer;
//!
//! let timer = WheelTimer::new(Duration::from_millis(100), 512)?;
//! let timeout = timer.submit(
//!     |_t: &tickwheel::Timeout| println!("fired"),
//!     Duration::from_secs(1),
//! )?;
//! assert!(!timeout.is_expired());
//! # Ok::<(), tickwheel::TimerError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_possible_truncation)]

pub mod clock;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod task;
#[doc(hidden)]
pub mod test_utils;
pub mod wheel;

pub use clock::{MonotonicClock, TimeUnit};
pub use config::SchedulerConfig;
pub use error::{ConfigError, TimerError};
pub use scheduler::WheelScheduler;
pub use task::{BoxError, TaskFailure, TimerTask};
pub use wheel::{Timeout, TimeoutState, WheelTimer, WheelTimerBuilder};
