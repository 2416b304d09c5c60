//! The submitter-visible timeout handle and its state protocol.
//!
//! A [`Timeout`] is shared between the submitting thread(s) and the worker
//! for its whole lifetime. The only field both sides touch is `state`, an
//! atomic tri-state advanced exclusively by compare-and-swap:
//!
//! ```text
//!        cancel() — any thread
//!       ┌─────────────────────► Cancelled
//!  New ─┤
//!       └─────────────────────► Expired
//!        expire() — worker only
//! ```
//!
//! Exactly one of the two transitions ever succeeds. Everything else on the
//! handle is either immutable (`deadline`, `task`) or owned by the worker
//! (the wheel-entry back-reference).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::task::{FailureHook, TaskFailure, TimerTask};
use crate::wheel::bucket::EntryId;
use crate::wheel::Inner;

const STATE_NEW: u8 = 0;
const STATE_CANCELLED: u8 = 1;
const STATE_EXPIRED: u8 = 2;

/// Sentinel for "not linked into any bucket".
const ENTRY_NONE: u64 = u64::MAX;

/// Resolution state of a [`Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutState {
    /// Submitted; neither cancelled nor expired yet.
    New,
    /// `cancel()` won the race; the task will never run.
    Cancelled,
    /// The worker expired the timeout; the task has been invoked.
    Expired,
}

/// Handle for one submitted timer.
///
/// Returned by [`WheelTimer::submit`](crate::WheelTimer::submit). Cheap to
/// clone via `Arc`; safe to cancel from any thread, any number of times.
pub struct Timeout {
    task: Arc<dyn TimerTask>,
    /// Nanosecond offset from the worker's published start reading.
    deadline_ns: u64,
    state: AtomicU8,
    /// Packed [`EntryId`] of the wheel entry holding this timeout, or
    /// [`ENTRY_NONE`]. Written and read only by the worker.
    entry: AtomicU64,
    /// Timer internals, for the cancellation queue push. Weak: queued
    /// handles must not keep a shut-down timer alive.
    inner: Weak<Inner>,
    /// Self-reference so `cancel(&self)` can enqueue an owned handle.
    this: Weak<Timeout>,
}

impl Timeout {
    pub(crate) fn create(
        task: Arc<dyn TimerTask>,
        deadline_ns: u64,
        inner: Weak<Inner>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            task,
            deadline_ns,
            state: AtomicU8::new(STATE_NEW),
            entry: AtomicU64::new(ENTRY_NONE),
            inner,
            this: this.clone(),
        })
    }

    /// Current resolution state.
    #[must_use]
    pub fn state(&self) -> TimeoutState {
        match self.state.load(Ordering::Acquire) {
            STATE_CANCELLED => TimeoutState::Cancelled,
            STATE_EXPIRED => TimeoutState::Expired,
            _ => TimeoutState::New,
        }
    }

    /// True once `cancel()` has won the race against expiration.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CANCELLED
    }

    /// True once the worker has expired this timeout.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_EXPIRED
    }

    /// The deadline as an offset from the timer's start instant.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_nanos(self.deadline_ns)
    }

    pub(crate) const fn deadline_ns(&self) -> u64 {
        self.deadline_ns
    }

    /// Attempts to cancel this timeout.
    ///
    /// Returns `true` iff this call performed the `New → Cancelled`
    /// transition, in which case the task will never run and the worker will
    /// unlink the handle from its bucket within a bounded number of ticks.
    /// Returns `false` if the timeout was already cancelled or expired —
    /// losing this race is a normal outcome, not an error.
    ///
    /// Never touches wheel structure and never blocks.
    pub fn cancel(&self) -> bool {
        if self.state.load(Ordering::Acquire) != STATE_NEW {
            return false;
        }
        if self
            .state
            .compare_exchange(
                STATE_NEW,
                STATE_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        // Hand the unlink work to the worker. If the timer is already gone
        // there is no bucket left to unlink from.
        if let (Some(inner), Some(this)) = (self.inner.upgrade(), self.this.upgrade()) {
            inner.cancelled.push(this);
        }
        true
    }

    /// Expires this timeout and runs its task. Worker-only.
    ///
    /// If the CAS loses, a concurrent `cancel()` got there first and nothing
    /// happens. If it wins, the task runs here on the worker thread; an `Err`
    /// or panic from the body is routed to `hook` and contained.
    pub(crate) fn expire(&self, hook: &FailureHook) {
        if self
            .state
            .compare_exchange(
                STATE_NEW,
                STATE_EXPIRED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        match catch_unwind(AssertUnwindSafe(|| self.task.run(self))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => hook(self, TaskFailure::Error(err)),
            Err(payload) => hook(self, TaskFailure::Panic(payload)),
        }
    }

    /// The wheel entry currently holding this timeout, if any. Worker-only.
    pub(crate) fn entry_id(&self) -> Option<EntryId> {
        EntryId::unpack(self.entry.load(Ordering::Relaxed))
    }

    /// Records the wheel entry holding this timeout. Worker-only.
    pub(crate) fn set_entry(&self, id: EntryId) {
        self.entry.store(id.pack(), Ordering::Relaxed);
    }

    /// Clears the wheel-entry back-reference. Worker-only.
    pub(crate) fn clear_entry(&self) {
        self.entry.store(ENTRY_NONE, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeout")
            .field("deadline", &self.deadline())
            .field("state", &self.state())
            .field("linked", &self.entry_id().is_some())
            .finish()
    }
}
