//! The core timer: controller, timeout handles, buckets, and the worker.
//!
//! [`WheelTimer`] is the public face. It owns the shared state, spawns the
//! worker thread lazily on first submission, and exposes the
//! submission-side operations. All wheel structure lives on the worker
//! thread; submitters communicate with it only through two lock-free queues
//! and per-timeout atomic state.
//!
//! # Lifecycle
//!
//! The controller is a monotone three-state machine:
//!
//! | From | Event | To | Effect |
//! |------|-------|----|--------|
//! | Init | `submit` | Started | spawn worker, wait for start instant |
//! | Init | `shutdown` | Shutdown | — |
//! | Started | `submit` | Started | enqueue on ingress |
//! | Started | `shutdown` | Shutdown | wake worker |
//! | Shutdown | `submit` | Shutdown | fails with `ShutDown` |
//! | Shutdown | `shutdown` | Shutdown | — |
//!
//! Shutdown abandons pending timeouts: they neither expire nor report.

mod bucket;
mod timeout;
mod worker;

pub use timeout::{Timeout, TimeoutState};

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::clock::MonotonicClock;
use crate::error::{ConfigError, TimerError, MAX_TICKS_PER_WHEEL};
use crate::task::{default_failure_hook, FailureHook, TimerTask};
use crate::wheel::worker::Worker;

pub(crate) const STATE_INIT: u8 = 0;
pub(crate) const STATE_STARTED: u8 = 1;
pub(crate) const STATE_SHUTDOWN: u8 = 2;

/// State shared between the controller, submitters, and the worker.
pub(crate) struct Inner {
    /// Controller lifecycle state; CAS-only transitions.
    pub(crate) state: AtomicU8,
    /// Tick length in nanoseconds.
    pub(crate) tick_ns: u64,
    /// Monotonic clock all deadlines are measured against.
    pub(crate) clock: MonotonicClock,
    /// Newly submitted timeouts awaiting placement. MPSC: worker pops.
    pub(crate) pending: SegQueue<Arc<Timeout>>,
    /// Cancelled timeouts awaiting unlink. MPSC: worker pops.
    pub(crate) cancelled: SegQueue<Arc<Timeout>>,
    /// Submitted-but-unresolved count, for diagnostics.
    pub(crate) pending_count: AtomicUsize,
    /// Worker's start reading; 0 until published.
    start_time: AtomicU64,
    start_mutex: Mutex<()>,
    start_condvar: Condvar,
    /// Parking for the worker's tick wait; `shutdown()` notifies it.
    pub(crate) sleep_mutex: Mutex<()>,
    pub(crate) sleep_condvar: Condvar,
    pub(crate) failure_hook: FailureHook,
}

impl Inner {
    /// Publishes the worker's start reading and releases first-submit waiters.
    pub(crate) fn publish_start(&self, start_ns: u64) {
        self.start_time.store(start_ns, Ordering::Release);
        let _guard = self.start_mutex.lock().unwrap();
        self.start_condvar.notify_all();
    }

    /// Blocks until the worker has published its start reading.
    fn wait_for_start(&self) -> u64 {
        let mut start = self.start_time.load(Ordering::Acquire);
        if start != 0 {
            return start;
        }
        let mut guard = self.start_mutex.lock().unwrap();
        loop {
            start = self.start_time.load(Ordering::Acquire);
            if start != 0 {
                return start;
            }
            guard = self.start_condvar.wait(guard).unwrap();
        }
    }

    fn wake_worker(&self) {
        let _guard = self.sleep_mutex.lock().unwrap();
        self.sleep_condvar.notify_all();
    }
}

/// Builder for a [`WheelTimer`].
///
/// ```no_run
/// use std::time::Duration;
/// use tickwheel::WheelTimer;
///
/// let timer = WheelTimer::builder()
///     .tick_duration(Duration::from_millis(10))
///     .ticks_per_wheel(64)
///     .thread_name("billing-timer")
///     .build()?;
/// # Ok::<(), tickwheel::ConfigError>(())
/// ```
pub struct WheelTimerBuilder {
    tick_duration: Duration,
    ticks_per_wheel: usize,
    thread_name: String,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    failure_hook: Option<FailureHook>,
}

impl Default for WheelTimerBuilder {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(100),
            ticks_per_wheel: 512,
            thread_name: "tickwheel-worker".to_string(),
            on_thread_start: None,
            on_thread_stop: None,
            failure_hook: None,
        }
    }
}

impl WheelTimerBuilder {
    /// Length of one wheel tick. Default: 100ms.
    #[must_use]
    pub fn tick_duration(mut self, tick: Duration) -> Self {
        self.tick_duration = tick;
        self
    }

    /// Requested wheel width; rounded up to a power of two. Default: 512.
    #[must_use]
    pub fn ticks_per_wheel(mut self, ticks: usize) -> Self {
        self.ticks_per_wheel = ticks;
        self
    }

    /// Name for the worker thread. Default: `tickwheel-worker`.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Callback run on the worker thread before the first tick.
    #[must_use]
    pub fn on_thread_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Callback run on the worker thread after it exits its loop.
    #[must_use]
    pub fn on_thread_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Hook invoked when a task body fails. Default: log via `tracing`.
    #[must_use]
    pub fn task_failure_hook(
        mut self,
        f: impl Fn(&Timeout, crate::task::TaskFailure) + Send + Sync + 'static,
    ) -> Self {
        self.failure_hook = Some(Arc::new(f));
        self
    }

    /// Validates the configuration and builds the timer.
    ///
    /// The worker thread is not spawned until the first submission.
    pub fn build(self) -> Result<WheelTimer, ConfigError> {
        if self.tick_duration.is_zero() {
            return Err(ConfigError::ZeroTickDuration);
        }
        let tick_ns = u64::try_from(self.tick_duration.as_nanos())
            .map_err(|_| ConfigError::TickDurationTooLarge(self.tick_duration))?;
        if self.ticks_per_wheel == 0 {
            return Err(ConfigError::ZeroTicksPerWheel);
        }
        if self.ticks_per_wheel > MAX_TICKS_PER_WHEEL {
            return Err(ConfigError::TicksPerWheelTooLarge {
                requested: self.ticks_per_wheel,
            });
        }
        let width = self.ticks_per_wheel.next_power_of_two();

        let inner = Arc::new(Inner {
            state: AtomicU8::new(STATE_INIT),
            tick_ns,
            clock: MonotonicClock::new(),
            pending: SegQueue::new(),
            cancelled: SegQueue::new(),
            pending_count: AtomicUsize::new(0),
            start_time: AtomicU64::new(0),
            start_mutex: Mutex::new(()),
            start_condvar: Condvar::new(),
            sleep_mutex: Mutex::new(()),
            sleep_condvar: Condvar::new(),
            failure_hook: self.failure_hook.unwrap_or_else(default_failure_hook),
        });

        Ok(WheelTimer {
            inner,
            width,
            thread_name: self.thread_name,
            on_thread_start: self.on_thread_start,
            on_thread_stop: self.on_thread_stop,
            worker_handle: Mutex::new(None),
        })
    }
}

/// A hashed timing wheel driven by one dedicated worker thread.
///
/// See the [crate docs](crate) for the overall model. Multiple timers may
/// coexist; each owns its own worker thread and wheel.
pub struct WheelTimer {
    inner: Arc<Inner>,
    /// Actual wheel width (power of two).
    width: usize,
    thread_name: String,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WheelTimer {
    /// Creates a timer with the given tick length and requested wheel width.
    ///
    /// `ticks_per_wheel` is rounded up to the next power of two. Fails on a
    /// zero tick, a zero width, or an out-of-range width.
    pub fn new(tick_duration: Duration, ticks_per_wheel: usize) -> Result<Self, ConfigError> {
        Self::builder()
            .tick_duration(tick_duration)
            .ticks_per_wheel(ticks_per_wheel)
            .build()
    }

    /// Returns a builder with the default configuration.
    #[must_use]
    pub fn builder() -> WheelTimerBuilder {
        WheelTimerBuilder::default()
    }

    /// Submits `task` to run once, `delay` from now.
    ///
    /// A zero delay is clamped to one tick; a timer never fires on the
    /// submitting thread and never in the same instant it was created. The
    /// first submission starts the worker thread and waits until it has
    /// published its start instant; after that, submission is wait-free.
    ///
    /// Fails with [`TimerError::ShutDown`] once [`shutdown`](Self::shutdown)
    /// has been called.
    pub fn submit<T>(&self, task: T, delay: Duration) -> Result<Arc<Timeout>, TimerError>
    where
        T: TimerTask + 'static,
    {
        self.submit_arc(Arc::new(task), delay)
    }

    /// Like [`submit`](Self::submit), for an already-shared task.
    pub fn submit_arc(
        &self,
        task: Arc<dyn TimerTask>,
        delay: Duration,
    ) -> Result<Arc<Timeout>, TimerError> {
        if self.inner.state.load(Ordering::Acquire) == STATE_SHUTDOWN {
            return Err(TimerError::ShutDown);
        }

        let start_ns = self.start()?;

        let delay_ns = if delay.is_zero() {
            self.inner.tick_ns
        } else {
            u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX)
        };
        let now = self.inner.clock.now_ns();
        let deadline_ns = now.saturating_sub(start_ns).saturating_add(delay_ns);

        let timeout = Timeout::create(task, deadline_ns, Arc::downgrade(&self.inner));
        self.inner.pending.push(Arc::clone(&timeout));
        self.inner.pending_count.fetch_add(1, Ordering::Relaxed);
        Ok(timeout)
    }

    /// Shuts the timer down.
    ///
    /// Idempotent. The worker exits at its next safe point; in-flight task
    /// bodies are not waited for, and pending timeouts are abandoned. From
    /// `Init` this transitions straight to `Shutdown` without ever starting
    /// a worker.
    pub fn shutdown(&self) {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_INIT,
                STATE_SHUTDOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::debug!("timer shut down before first use");
            return;
        }
        if self
            .inner
            .state
            .compare_exchange(
                STATE_STARTED,
                STATE_SHUTDOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::debug!("timer shutting down");
            self.inner.wake_worker();
        }
    }

    /// True iff the worker has been started and not yet shut down.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STATE_STARTED
    }

    /// Number of submitted timeouts not yet expired, cancelled, or abandoned.
    ///
    /// Best-effort: the count trails the worker's bookkeeping by up to a
    /// tick.
    #[must_use]
    pub fn pending_timeouts(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// The actual wheel width after power-of-two normalization.
    #[must_use]
    pub const fn wheel_width(&self) -> usize {
        self.width
    }

    /// Lazily transitions `Init → Started`, spawning the worker, then waits
    /// for the published start reading.
    fn start(&self) -> Result<u64, TimerError> {
        match self.inner.state.compare_exchange(
            STATE_INIT,
            STATE_STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => self.spawn_worker(),
            Err(STATE_STARTED) => {}
            Err(_) => return Err(TimerError::ShutDown),
        }
        Ok(self.inner.wait_for_start())
    }

    fn spawn_worker(&self) {
        let inner = Arc::clone(&self.inner);
        let width = self.width;
        let on_start = self.on_thread_start.clone();
        let on_stop = self.on_thread_stop.clone();

        let handle = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                if let Some(callback) = &on_start {
                    callback();
                }
                Worker::new(inner, width).run();
                if let Some(callback) = &on_stop {
                    callback();
                }
            })
            .expect("failed to spawn timer worker thread");

        *self.worker_handle.lock().unwrap() = Some(handle);
    }
}

impl Drop for WheelTimer {
    fn drop(&mut self) {
        self.shutdown();
        // The worker wakes at the shutdown notification and exits, so this
        // join is bounded by one tick wait.
        if let Some(handle) = self.worker_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for WheelTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WheelTimer")
            .field("tick_ns", &self.inner.tick_ns)
            .field("wheel_width", &self.width)
            .field("running", &self.is_running())
            .field("pending", &self.pending_timeouts())
            .finish()
    }
}
