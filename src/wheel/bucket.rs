//! Worker-owned wheel storage: the entry arena and per-slot bucket lists.
//!
//! Each submitted timeout that reaches the wheel gets one [`WheelEntry`] in a
//! generation-checked arena. Buckets are doubly-linked lists threaded through
//! the entries by [`EntryId`], one list per wheel slot. Holding the links as
//! arena ids rather than pointers keeps ownership acyclic: the arena owns the
//! entry, the entry holds one `Arc` to the shared timeout, and the timeout
//! records its entry id so cancellation can find it.
//!
//! Nothing in here is thread-safe. The worker is the only code that touches
//! entries, links, buckets, or round counters.

use std::sync::Arc;

use crate::task::FailureHook;
use crate::wheel::timeout::Timeout;

/// Identifier of an occupied arena slot.
///
/// Carries a generation counter so an id retained after its slot was freed
/// and reused can never alias the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    /// Packs the id into a `u64` for storage in the timeout handle.
    pub(crate) const fn pack(self) -> u64 {
        ((self.index as u64) << 32) | self.generation as u64
    }

    /// Unpacks a stored id; `u64::MAX` is the "none" sentinel.
    pub(crate) const fn unpack(packed: u64) -> Option<Self> {
        if packed == u64::MAX {
            None
        } else {
            Some(Self {
                index: (packed >> 32) as u32,
                generation: packed as u32,
            })
        }
    }
}

/// One timeout's wheel-side bookkeeping.
pub(crate) struct WheelEntry {
    pub(crate) timeout: Arc<Timeout>,
    /// Full wheel revolutions left before this entry is due.
    pub(crate) remaining_rounds: u64,
    /// Slot whose bucket list currently holds this entry.
    pub(crate) bucket: Option<usize>,
    pub(crate) prev: Option<EntryId>,
    pub(crate) next: Option<EntryId>,
}

enum Slot {
    Occupied { entry: WheelEntry, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Generation-checked arena of wheel entries with a free list.
pub(crate) struct EntryArena {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    len: usize,
}

impl EntryArena {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, entry: WheelEntry) -> EntryId {
        self.len += 1;

        if let Some(free) = self.free_head {
            let slot = &mut self.slots[free as usize];
            match slot {
                Slot::Vacant {
                    next_free,
                    generation,
                } => {
                    let generation = *generation;
                    self.free_head = *next_free;
                    *slot = Slot::Occupied { entry, generation };
                    EntryId {
                        index: free,
                        generation,
                    }
                }
                Slot::Occupied { .. } => unreachable!("free list pointed to occupied slot"),
            }
        } else {
            let index = u32::try_from(self.slots.len()).expect("wheel entry arena overflow");
            self.slots.push(Slot::Occupied {
                entry,
                generation: 0,
            });
            EntryId {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn remove(&mut self, id: EntryId) -> Option<WheelEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {
                let next_generation = generation.wrapping_add(1);
                let old = std::mem::replace(
                    slot,
                    Slot::Vacant {
                        next_free: self.free_head,
                        generation: next_generation,
                    },
                );
                self.free_head = Some(id.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { entry, .. } => Some(entry),
                    Slot::Vacant { .. } => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<&WheelEntry> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { entry, generation } if *generation == id.generation => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut WheelEntry> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { entry, generation } if *generation == id.generation => Some(entry),
            _ => None,
        }
    }
}

/// Head and tail of one slot's list.
#[derive(Default, Clone, Copy)]
struct Bucket {
    head: Option<EntryId>,
    tail: Option<EntryId>,
}

/// The wheel proper: a power-of-two array of buckets plus the entry arena.
pub(crate) struct Wheel {
    buckets: Box<[Bucket]>,
    entries: EntryArena,
    mask: u64,
}

impl Wheel {
    /// `width` must be a power of two; the controller normalizes it.
    pub(crate) fn new(width: usize) -> Self {
        debug_assert!(width.is_power_of_two());
        Self {
            buckets: vec![Bucket::default(); width].into_boxed_slice(),
            entries: EntryArena::new(),
            mask: width as u64 - 1,
        }
    }

    pub(crate) const fn mask(&self) -> u64 {
        self.mask
    }

    pub(crate) const fn width(&self) -> u64 {
        self.mask + 1
    }

    /// Number of timeouts currently linked into buckets.
    pub(crate) const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Links `timeout` at the tail of `slot`'s bucket.
    ///
    /// Precondition: the timeout is not linked anywhere (its entry
    /// back-reference is clear).
    pub(crate) fn place(&mut self, timeout: Arc<Timeout>, slot: usize, remaining_rounds: u64) {
        debug_assert!(timeout.entry_id().is_none());
        let tail = self.buckets[slot].tail;
        let id = self.entries.insert(WheelEntry {
            timeout,
            remaining_rounds,
            bucket: Some(slot),
            prev: tail,
            next: None,
        });

        match tail {
            Some(tail_id) => {
                if let Some(tail_entry) = self.entries.get_mut(tail_id) {
                    tail_entry.next = Some(id);
                }
            }
            None => self.buckets[slot].head = Some(id),
        }
        self.buckets[slot].tail = Some(id);

        if let Some(entry) = self.entries.get(id) {
            entry.timeout.set_entry(id);
        }
    }

    /// Unlinks the entry from its bucket list, clearing its links.
    ///
    /// Returns the successor the entry had before removal, so a traversal can
    /// continue after removing the node under its cursor.
    fn unlink(&mut self, id: EntryId) -> Option<EntryId> {
        let (prev, next, slot) = {
            let entry = self.entries.get(id)?;
            (entry.prev, entry.next, entry.bucket)
        };

        match prev {
            Some(prev_id) => {
                if let Some(prev_entry) = self.entries.get_mut(prev_id) {
                    prev_entry.next = next;
                }
            }
            None => {
                if let Some(slot) = slot {
                    self.buckets[slot].head = next;
                }
            }
        }
        match next {
            Some(next_id) => {
                if let Some(next_entry) = self.entries.get_mut(next_id) {
                    next_entry.prev = prev;
                }
            }
            None => {
                if let Some(slot) = slot {
                    self.buckets[slot].tail = prev;
                }
            }
        }

        if let Some(entry) = self.entries.get_mut(id) {
            entry.prev = None;
            entry.next = None;
            entry.bucket = None;
        }
        next
    }

    /// Unlinks and drops the wheel entry of a cancelled timeout.
    ///
    /// Returns `true` if an entry was removed. A timeout that was never
    /// placed, or whose entry is already gone, is a no-op — a stale id fails
    /// the arena's generation check rather than touching anything.
    pub(crate) fn remove_cancelled(&mut self, timeout: &Timeout) -> bool {
        let Some(id) = timeout.entry_id() else {
            return false;
        };
        self.unlink(id);
        match self.entries.remove(id) {
            Some(entry) => {
                entry.timeout.clear_entry();
                true
            }
            None => false,
        }
    }

    /// Processes `slot`'s bucket for the current tick.
    ///
    /// Entries with rounds remaining are decremented in place. Due entries
    /// are spliced out and expired — the deadline check guards against an
    /// early pass. Returns the number of entries removed.
    pub(crate) fn expire_slot(&mut self, slot: usize, now_ns: u64, hook: &FailureHook) -> usize {
        let mut removed = 0;
        let mut cursor = self.buckets[slot].head;

        while let Some(id) = cursor {
            // Successor first: removal clears the links.
            let (next, remaining_rounds) = match self.entries.get(id) {
                Some(entry) => (entry.next, entry.remaining_rounds),
                None => break,
            };

            if remaining_rounds == 0 {
                self.unlink(id);
                if let Some(entry) = self.entries.remove(id) {
                    entry.timeout.clear_entry();
                    removed += 1;
                    if entry.timeout.deadline_ns() <= now_ns {
                        entry.timeout.expire(hook);
                    }
                }
            } else if let Some(entry) = self.entries.get_mut(id) {
                entry.remaining_rounds -= 1;
            }

            cursor = next;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{FailureHook, TimerTask};
    use crate::wheel::timeout::TimeoutState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, Weak};

    fn timeout_with(deadline_ns: u64, task: Arc<dyn TimerTask>) -> Arc<Timeout> {
        Timeout::create(task, deadline_ns, Weak::new())
    }

    fn timeout(deadline_ns: u64) -> Arc<Timeout> {
        timeout_with(deadline_ns, Arc::new(|_: &Timeout| {}))
    }

    fn quiet_hook() -> FailureHook {
        Arc::new(|_, _| {})
    }

    #[test]
    fn entry_id_round_trips_through_packing() {
        let id = EntryId {
            index: 7,
            generation: 3,
        };
        assert_eq!(EntryId::unpack(id.pack()), Some(id));
        assert_eq!(EntryId::unpack(u64::MAX), None);
    }

    #[test]
    fn arena_reuses_slots_with_fresh_generations() {
        let mut arena = EntryArena::new();
        let a = arena.insert(WheelEntry {
            timeout: timeout(1),
            remaining_rounds: 0,
            bucket: None,
            prev: None,
            next: None,
        });
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());

        let b = arena.insert(WheelEntry {
            timeout: timeout(2),
            remaining_rounds: 0,
            bucket: None,
            prev: None,
            next: None,
        });
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
    }

    #[test]
    fn place_links_fifo_and_sets_back_reference() {
        let mut wheel = Wheel::new(8);
        let a = timeout(1);
        let b = timeout(2);
        let c = timeout(3);
        wheel.place(Arc::clone(&a), 3, 0);
        wheel.place(Arc::clone(&b), 3, 0);
        wheel.place(Arc::clone(&c), 3, 0);

        assert_eq!(wheel.len(), 3);
        assert!(a.entry_id().is_some());
        assert!(b.entry_id().is_some());
        assert!(c.entry_id().is_some());

        // Expiration must visit the bucket in insertion order.
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut wheel = Wheel::new(8);
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            let t = timeout_with(
                0,
                Arc::new(move |_: &Timeout| order.lock().unwrap().push(tag)),
            );
            wheel.place(t, 0, 0);
        }
        wheel.expire_slot(0, 10, &quiet_hook());
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_cancelled_unlinks_middle_of_list() {
        let mut wheel = Wheel::new(8);
        let a = timeout(1);
        let b = timeout(2);
        let c = timeout(3);
        wheel.place(Arc::clone(&a), 0, 0);
        wheel.place(Arc::clone(&b), 0, 0);
        wheel.place(Arc::clone(&c), 0, 0);

        assert!(wheel.remove_cancelled(&b));
        assert!(b.entry_id().is_none());
        assert_eq!(wheel.len(), 2);
        // A second attempt finds nothing to do.
        assert!(!wheel.remove_cancelled(&b));

        // Remaining entries still expire in order.
        let hook = quiet_hook();
        let removed = wheel.expire_slot(0, 10, &hook);
        assert_eq!(removed, 2);
        assert_eq!(a.state(), TimeoutState::Expired);
        assert_eq!(c.state(), TimeoutState::Expired);
        assert_eq!(wheel.len(), 0);
    }

    #[test]
    fn remove_cancelled_of_unplaced_timeout_is_a_no_op() {
        let mut wheel = Wheel::new(8);
        let t = timeout(1);
        assert!(!wheel.remove_cancelled(&t));
    }

    #[test]
    fn expire_slot_decrements_rounds_in_place() {
        let mut wheel = Wheel::new(8);
        let t = timeout(0);
        wheel.place(Arc::clone(&t), 2, 1);

        let hook = quiet_hook();
        assert_eq!(wheel.expire_slot(2, 100, &hook), 0);
        assert_eq!(t.state(), TimeoutState::New);
        assert_eq!(wheel.len(), 1);

        // Next revolution: rounds hit zero and the entry expires.
        assert_eq!(wheel.expire_slot(2, 100, &hook), 1);
        assert_eq!(t.state(), TimeoutState::Expired);
        assert_eq!(wheel.len(), 0);
    }

    #[test]
    fn early_pass_splices_without_expiring() {
        let mut wheel = Wheel::new(8);
        let t = timeout(1_000);
        wheel.place(Arc::clone(&t), 4, 0);

        // Due by rounds but the deadline is still in the future.
        let removed = wheel.expire_slot(4, 500, &quiet_hook());
        assert_eq!(removed, 1);
        assert_eq!(t.state(), TimeoutState::New);
        assert!(t.entry_id().is_none());
    }

    #[test]
    fn cancelled_entry_in_bucket_does_not_run_its_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let t = timeout_with(
            0,
            Arc::new(move |_: &Timeout| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut wheel = Wheel::new(8);
        wheel.place(Arc::clone(&t), 0, 0);
        // Submitter-side CAS wins before the worker reaches the bucket.
        assert!(t.cancel());

        wheel.expire_slot(0, 10, &quiet_hook());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(t.state(), TimeoutState::Cancelled);
    }

    #[test]
    fn failing_task_does_not_stop_the_bucket() {
        let failures = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let hook: FailureHook = {
            let failures = Arc::clone(&failures);
            Arc::new(move |_, _| {
                failures.fetch_add(1, Ordering::SeqCst);
            })
        };

        let mut wheel = Wheel::new(8);
        wheel.place(
            timeout_with(0, Arc::new(|_: &Timeout| panic!("first"))),
            0,
            0,
        );
        let counter = Arc::clone(&runs);
        wheel.place(
            timeout_with(
                0,
                Arc::new(move |_: &Timeout| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ),
            0,
            0,
        );

        wheel.expire_slot(0, 10, &hook);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
