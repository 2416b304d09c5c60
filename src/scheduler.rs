//! String-id scheduler facade over the wheel timer.
//!
//! [`WheelScheduler`] wraps plain `Fn()` jobs into timer tasks, hands out
//! opaque `task-<n>` identifiers, and keeps an id → handle map so callers can
//! cancel by id. Fixed-rate jobs re-submit themselves after each run for as
//! long as their id stays in the map.
//!
//! Re-submission and `cancel` are serialized through the map's per-entry
//! lock: either the cancel removes the entry first and the job is not
//! re-submitted, or the fresh handle is stored first and the cancel finds
//! and cancels it. A cancelled fixed-rate job can therefore never leave an
//! orphaned timer behind.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::SchedulerConfig;
use crate::error::TimerError;
use crate::task::{BoxError, TimerTask};
use crate::wheel::{Timeout, WheelTimer};

type TaskMap = DashMap<String, Arc<Timeout>>;

/// Scheduler facade: schedule and cancel jobs by string id.
///
/// All methods are safe to call from any thread.
pub struct WheelScheduler {
    timer: Arc<WheelTimer>,
    tasks: Arc<TaskMap>,
    next_task_id: AtomicU64,
}

impl WheelScheduler {
    /// Wraps an existing timer.
    #[must_use]
    pub fn new(timer: WheelTimer) -> Self {
        Self {
            timer: Arc::new(timer),
            tasks: Arc::new(DashMap::new()),
            next_task_id: AtomicU64::new(0),
        }
    }

    /// Builds a scheduler from validated configuration.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, TimerError> {
        config.validate()?;
        let timer = WheelTimer::new(config.tick(), config.ticks_per_wheel)?;
        Ok(Self::new(timer))
    }

    /// Schedules `job` to run once, `delay` from now.
    ///
    /// Returns the job's id. The id stays valid until the job runs or is
    /// cancelled. Fails with [`TimerError::InvalidDelay`] on a zero delay.
    pub fn schedule<F>(&self, job: F, delay: Duration) -> Result<String, TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if delay.is_zero() {
            return Err(TimerError::InvalidDelay);
        }

        let task_id = self.next_id();
        let task = OneShotJob {
            job: Box::new(job),
            id: task_id.clone(),
            tasks: Arc::clone(&self.tasks),
        };
        let timeout = self.timer.submit(task, delay)?;
        self.tasks.insert(task_id.clone(), timeout);
        tracing::trace!(id = %task_id, ?delay, "scheduled one-shot job");
        Ok(task_id)
    }

    /// Schedules `job` to run after `initial_delay`, then every `period`.
    ///
    /// The job keeps re-submitting itself until its id is cancelled or the
    /// scheduler shuts down. Fails with [`TimerError::InvalidDelay`] if
    /// either duration is zero.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        job: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<String, TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if initial_delay.is_zero() || period.is_zero() {
            return Err(TimerError::InvalidDelay);
        }

        let task_id = self.next_id();
        let task = Arc::new_cyclic(|me: &Weak<FixedRateJob>| FixedRateJob {
            job: Box::new(job),
            id: task_id.clone(),
            period,
            tasks: Arc::clone(&self.tasks),
            timer: Arc::downgrade(&self.timer),
            this: me.clone(),
        });
        let timeout = self.timer.submit_arc(task, initial_delay)?;
        self.tasks.insert(task_id.clone(), timeout);
        tracing::trace!(id = %task_id, ?initial_delay, ?period, "scheduled fixed-rate job");
        Ok(task_id)
    }

    /// Cancels the job with the given id.
    ///
    /// Returns `true` iff the id was present. The job will not run again; a
    /// run already in progress is not interrupted.
    pub fn cancel(&self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some((_, timeout)) => {
                timeout.cancel();
                tracing::trace!(id, "cancelled job");
                true
            }
            None => false,
        }
    }

    /// Shuts down the underlying timer, cancels every mapped job, and clears
    /// the map. Un-run jobs are dropped silently. Idempotent.
    pub fn shutdown(&self) {
        self.timer.shutdown();
        for entry in self.tasks.iter() {
            entry.value().cancel();
        }
        self.tasks.clear();
    }

    /// True iff the underlying timer worker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Number of ids currently mapped.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.tasks.len()
    }

    fn next_id(&self) -> String {
        let seq = self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("task-{seq}")
    }
}

impl std::fmt::Debug for WheelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WheelScheduler")
            .field("running", &self.is_running())
            .field("active_jobs", &self.active_jobs())
            .finish()
    }
}

/// Runs once, then removes its id from the map — also when the job fails.
struct OneShotJob {
    job: Box<dyn Fn() + Send + Sync>,
    id: String,
    tasks: Arc<TaskMap>,
}

impl TimerTask for OneShotJob {
    fn run(&self, _timeout: &Timeout) -> Result<(), BoxError> {
        let result = catch_unwind(AssertUnwindSafe(|| (self.job)()));
        self.tasks.remove(&self.id);
        if let Err(payload) = result {
            resume_unwind(payload);
        }
        Ok(())
    }
}

/// Runs, then re-submits itself while its id is still mapped.
struct FixedRateJob {
    job: Box<dyn Fn() + Send + Sync>,
    id: String,
    period: Duration,
    tasks: Arc<TaskMap>,
    /// Weak: a queued job must not keep a dropped timer alive.
    timer: Weak<WheelTimer>,
    this: Weak<FixedRateJob>,
}

impl FixedRateJob {
    /// Re-submits under the map entry's lock; see the module docs for why.
    fn reschedule(&self) {
        let Some(timer) = self.timer.upgrade() else {
            return;
        };
        let Some(me) = self.this.upgrade() else {
            return;
        };

        if let Entry::Occupied(mut slot) = self.tasks.entry(self.id.clone()) {
            match timer.submit_arc(me, self.period) {
                Ok(next) => {
                    slot.insert(next);
                }
                Err(err) => {
                    tracing::debug!(id = %self.id, %err, "fixed-rate job not re-submitted");
                    slot.remove();
                }
            }
        }
    }
}

impl TimerTask for FixedRateJob {
    fn run(&self, _timeout: &Timeout) -> Result<(), BoxError> {
        let result = catch_unwind(AssertUnwindSafe(|| (self.job)()));
        self.reschedule();
        if let Err(payload) = result {
            resume_unwind(payload);
        }
        Ok(())
    }
}
