//! The worker: the single thread that owns the wheel and advances time.
//!
//! Each tick the worker wakes at `start + (tick + 1) × tick_ns`, then:
//!
//! 1. drains the cancellation queue, unlinking any bucket residents;
//! 2. ingests a bounded batch from the submission queue, placing each
//!    timeout into its slot with its round count;
//! 3. expires the current slot's bucket;
//! 4. advances the tick counter.
//!
//! The ordering matters: a cancellation committed before the tick can never
//! be re-added by this tick's ingestion, and a submission observed with a
//! due deadline lands in the current slot (via the `max` clamp) and expires
//! in the same pass. Ingestion is capped per tick so a submission burst
//! cannot starve expiration.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::wheel::bucket::Wheel;
use crate::wheel::{Inner, STATE_SHUTDOWN, STATE_STARTED};

/// Most submissions transferred from the ingress queue in one tick.
const INGEST_BATCH: usize = 100_000;

/// Computes the slot and round count for a deadline observed at `current_tick`.
///
/// `calculated` is the absolute tick the deadline falls in. A deadline already
/// in the past clamps to the current tick so it expires in this very pass.
pub(crate) fn placement(
    deadline_ns: u64,
    tick_ns: u64,
    current_tick: u64,
    width: u64,
) -> (usize, u64) {
    let calculated = deadline_ns / tick_ns;
    let remaining_rounds = calculated.saturating_sub(current_tick) / width;
    let ticks = calculated.max(current_tick);
    let slot = (ticks & (width - 1)) as usize;
    (slot, remaining_rounds)
}

pub(crate) struct Worker {
    inner: Arc<Inner>,
    wheel: Wheel,
    /// Published start reading; all deadlines are offsets from this.
    start_ns: u64,
    current_tick: u64,
}

impl Worker {
    pub(crate) fn new(inner: Arc<Inner>, width: usize) -> Self {
        Self {
            inner,
            wheel: Wheel::new(width),
            start_ns: 0,
            current_tick: 0,
        }
    }

    /// The worker thread body.
    pub(crate) fn run(mut self) {
        let mut start = self.inner.clock.now_ns();
        if start == 0 {
            // 0 means "not yet published" to first-submit waiters.
            start = 1;
        }
        self.start_ns = start;
        self.inner.publish_start(start);
        tracing::debug!(
            tick_ns = self.inner.tick_ns,
            width = self.wheel.width(),
            "timer worker started"
        );

        while self.inner.state.load(Ordering::Acquire) == STATE_STARTED {
            let Some(now) = self.wait_for_next_tick() else {
                break;
            };
            let idx = (self.current_tick & self.wheel.mask()) as usize;

            self.drain_cancellations();
            self.ingest_submissions();

            let now_offset = now.saturating_sub(self.start_ns);
            let removed = self
                .wheel
                .expire_slot(idx, now_offset, &self.inner.failure_hook);
            if removed > 0 {
                self.inner.pending_count.fetch_sub(removed, Ordering::Relaxed);
            }

            self.current_tick += 1;
        }

        // Anything still queued or linked is abandoned with the wheel.
        tracing::debug!(
            tick = self.current_tick,
            abandoned = self.wheel.len(),
            "timer worker stopped"
        );
    }

    /// Sleeps until the next tick boundary.
    ///
    /// Returns the current clock reading once it is at or past the target, or
    /// `None` when woken into shutdown. Sleeping goes through the shared
    /// condvar so `shutdown()` can interrupt it; a wake that is neither
    /// shutdown nor on time simply re-enters the wait.
    fn wait_for_next_tick(&self) -> Option<u64> {
        let target = self.start_ns + (self.current_tick + 1) * self.inner.tick_ns;

        loop {
            let now = self.inner.clock.now_ns();
            if now >= target {
                return Some(now);
            }

            // Milliseconds, rounded up, so we never wake a whole tick early.
            let sleep_ms = (target - now).div_ceil(1_000_000);
            let guard = self.inner.sleep_mutex.lock().unwrap();
            let _unused = self
                .inner
                .sleep_condvar
                .wait_timeout(guard, Duration::from_millis(sleep_ms))
                .unwrap();

            if self.inner.state.load(Ordering::Acquire) == STATE_SHUTDOWN {
                return None;
            }
        }
    }

    /// Unlinks every handle queued by winning `cancel()` calls.
    fn drain_cancellations(&mut self) {
        let mut unlinked = 0_usize;
        while let Some(timeout) = self.inner.cancelled.pop() {
            if self.wheel.remove_cancelled(&timeout) {
                unlinked += 1;
            }
        }
        if unlinked > 0 {
            self.inner.pending_count.fetch_sub(unlinked, Ordering::Relaxed);
            tracing::trace!(unlinked, tick = self.current_tick, "drained cancellations");
        }
    }

    /// Moves up to [`INGEST_BATCH`] submissions into their buckets.
    fn ingest_submissions(&mut self) {
        let width = self.wheel.width();
        for _ in 0..INGEST_BATCH {
            let Some(timeout) = self.inner.pending.pop() else {
                break;
            };
            if timeout.is_cancelled() {
                // Cancelled before placement; nothing to unlink.
                self.inner.pending_count.fetch_sub(1, Ordering::Relaxed);
                continue;
            }

            let (slot, remaining_rounds) = placement(
                timeout.deadline_ns(),
                self.inner.tick_ns,
                self.current_tick,
                width,
            );
            self.wheel.place(timeout, slot, remaining_rounds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_NS: u64 = 10_000_000; // 10ms
    const WIDTH: u64 = 8;

    #[test]
    fn placement_within_first_revolution() {
        // Deadline 25ms with 10ms ticks: due in absolute tick 2, no rounds.
        let (slot, rounds) = placement(25_000_000, TICK_NS, 0, WIDTH);
        assert_eq!(slot, 2);
        assert_eq!(rounds, 0);
    }

    #[test]
    fn placement_wraps_with_rounds() {
        // Deadline 100ms: absolute tick 10, one full revolution away.
        let (slot, rounds) = placement(100_000_000, TICK_NS, 0, WIDTH);
        assert_eq!(slot, 10 & 7);
        assert_eq!(rounds, 1);
    }

    #[test]
    fn placement_counts_rounds_from_observation_tick() {
        // Observed at tick 9, a deadline in tick 10 is one slot ahead.
        let (slot, rounds) = placement(100_000_000, TICK_NS, 9, WIDTH);
        assert_eq!(slot, 2);
        assert_eq!(rounds, 0);
    }

    #[test]
    fn late_deadline_clamps_to_current_slot() {
        // Deadline tick 1 observed at tick 5: lands in slot 5, due now.
        let (slot, rounds) = placement(15_000_000, TICK_NS, 5, WIDTH);
        assert_eq!(slot, 5);
        assert_eq!(rounds, 0);
    }

    #[test]
    fn placement_slot_and_rounds_are_consistent() {
        // slot = deadline-tick mod W, rounds = distance / W, for any
        // observation tick at or before the deadline tick.
        for current_tick in 0..20 {
            for deadline_tick in current_tick..current_tick + 40 {
                let (slot, rounds) =
                    placement(deadline_tick * TICK_NS, TICK_NS, current_tick, WIDTH);
                assert_eq!(slot as u64, deadline_tick % WIDTH);
                assert_eq!(rounds, (deadline_tick - current_tick) / WIDTH);
            }
        }
    }
}
