//! Lamport's bakery algorithm.
//!
//! Software mutual exclusion for a fixed set of participants. Entering
//! participants pass through a doorway (raise `choosing`, take a label one
//! greater than every label observed, lower `choosing`), then wait until no
//! peer is choosing and no peer holds a smaller `(label, id)` pair. The
//! protocol needs no compare-and-swap: each slot is written only by its
//! owner.
//!
//! The loads and stores themselves are relaxed; correctness under the
//! C11/Rust memory model comes from explicit fences. Without the two SeqCst
//! doorway fences, store buffering lets two participants each miss the
//! other's doorway and enter with equal priority claims; the fences forbid
//! the `W choosing -> R label` and `R choosing -> W label` reorderings that
//! the scenario needs. Acquire fences pair with them (and with the release
//! store on exit) so that label reads and the protected data are current.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{self, AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use mk_core::ParticipantId;

/// Label value meaning "not competing".
const LABEL_IDLE: u64 = 0;

#[derive(Debug)]
struct Slot {
    choosing: AtomicBool,
    label: AtomicU64,
}

/// N-participant bakery lock.
///
/// Participant ids must be unique among concurrent users of one lock;
/// slot `i` is written only by participant `i`.
#[derive(Debug)]
pub struct BakeryLock {
    slots: Vec<CachePadded<Slot>>,
}

impl BakeryLock {
    /// Create a lock for the given number of participants.
    #[must_use]
    pub fn new(participants_count: usize) -> Self {
        assert!(participants_count > 0, "Lock needs at least one participant");

        let slots = (0..participants_count)
            .map(|_| {
                CachePadded::new(Slot {
                    choosing: AtomicBool::new(false),
                    label: AtomicU64::new(LABEL_IDLE),
                })
            })
            .collect();

        Self { slots }
    }

    /// Number of participants the lock was sized for.
    #[must_use]
    pub fn participants_count(&self) -> usize {
        self.slots.len()
    }

    /// Enter the critical section as `participant`.
    ///
    /// Spins until every peer with a smaller `(label, id)` pair has left.
    /// The returned guard exits the critical section on drop.
    pub fn lock(&self, participant: ParticipantId) -> BakeryGuard<'_> {
        debug_assert!(participant < self.slots.len(), "Participant out of range");

        self.acquire(participant);
        BakeryGuard {
            lock: self,
            participant,
        }
    }

    fn acquire(&self, me: ParticipantId) {
        let my_slot = &self.slots[me];

        my_slot.choosing.store(true, Ordering::Relaxed);

        // Covers the `W choosing -> R label` edge of the store-buffering
        // scenario described in the module docs.
        atomic::fence(Ordering::SeqCst);

        let label_max = self
            .slots
            .iter()
            .map(|slot| slot.label.load(Ordering::Relaxed))
            .max()
            .expect("lock has at least one slot");
        debug_assert!(label_max < u64::MAX, "Label counter exhausted");
        let my_label = label_max + 1;

        my_slot.label.store(my_label, Ordering::Relaxed);

        // Covers the `R choosing -> W label` edge, and makes the new label
        // visible to any peer that observes `choosing` go false below.
        atomic::fence(Ordering::SeqCst);

        my_slot.choosing.store(false, Ordering::Relaxed);

        for (other, other_slot) in self.slots.iter().enumerate() {
            if other == me {
                continue;
            }

            let backoff = Backoff::new();
            while other_slot.choosing.load(Ordering::Relaxed) {
                backoff.snooze();
            }

            // Pairs with the SeqCst fence before the peer's `choosing`
            // store so the label read below is at least as fresh.
            atomic::fence(Ordering::Acquire);

            let backoff = Backoff::new();
            loop {
                let other_label = other_slot.label.load(Ordering::Relaxed);
                if other_label == LABEL_IDLE || (my_label, me) < (other_label, other) {
                    break;
                }
                backoff.snooze();
            }
        }

        // Pairs with the release store in `release` by previous owners whose
        // idle labels we observed, ordering the protected data behind us.
        atomic::fence(Ordering::Acquire);
    }

    fn release(&self, me: ParticipantId) {
        // Pairs with the final acquire fence in `acquire` of the next owner.
        self.slots[me].label.store(LABEL_IDLE, Ordering::Release);
    }
}

/// Critical-section guard for a [`BakeryLock`].
///
/// Exits the critical section when dropped.
#[must_use]
pub struct BakeryGuard<'a> {
    lock: &'a BakeryLock,
    participant: ParticipantId,
}

impl BakeryGuard<'_> {
    /// Participant holding the critical section.
    #[must_use]
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }
}

impl Drop for BakeryGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.participant);
    }
}

/// State protected by a [`BakeryLock`].
///
/// The value is reachable only through the guard returned by [`lock`],
/// so every access happens inside the critical section.
///
/// [`lock`]: BakeryCell::lock
#[derive(Debug)]
pub struct BakeryCell<T> {
    lock: BakeryLock,
    value: UnsafeCell<T>,
}

// SAFETY: the bakery lock serializes all access to `value`, and its fences
// order those accesses across participants.
unsafe impl<T: Send> Sync for BakeryCell<T> {}

impl<T> BakeryCell<T> {
    /// Create a cell for the given number of participants.
    #[must_use]
    pub fn new(participants_count: usize, value: T) -> Self {
        Self {
            lock: BakeryLock::new(participants_count),
            value: UnsafeCell::new(value),
        }
    }

    /// Enter the critical section and borrow the protected value.
    pub fn lock(&self, participant: ParticipantId) -> BakeryCellGuard<'_, T> {
        BakeryCellGuard {
            guard: self.lock.lock(participant),
            cell: self,
        }
    }

    /// Borrow the value without locking. Requires exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// Guard borrowing the value inside a [`BakeryCell`].
#[must_use]
pub struct BakeryCellGuard<'a, T> {
    // Field order keeps the critical section open for as long as the
    // borrow exists; dropped in declaration order.
    guard: BakeryGuard<'a>,
    cell: &'a BakeryCell<T>,
}

impl<T> BakeryCellGuard<'_, T> {
    /// Participant holding the critical section.
    #[must_use]
    pub fn participant(&self) -> ParticipantId {
        self.guard.participant()
    }
}

impl<T> Deref for BakeryCellGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the bakery guard proves this thread is alone in the
        // critical section.
        unsafe { &*self.cell.value.get() }
    }
}

impl<T> DerefMut for BakeryCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above; mutual exclusion makes the borrow unique.
        unsafe { &mut *self.cell.value.get() }
    }
}
