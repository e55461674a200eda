//! Row lock manager: shared/exclusive modes, per-row FIFO queues, S-burst
//! wake on release, and waits-for deadlock detection.
//!
//! Requests live in buckets hashed by record id, each bucket an ordered
//! sequence in arrival order. Arrival order is the source of fairness:
//! conflicts are decided against earlier requests only, and releases wake
//! successors in queue order. The whole table sits behind one mutex, so
//! the deadlock search never has to order bucket latches against itself;
//! waiters park on a per-slot condition variable *outside* that mutex.

use std::sync::{Condvar, Mutex, MutexGuard};

use mk_sync::{SeqKey, SeqList};

use crate::TrxError;

/// Worker-thread slot index, `0..slots_count`. One transaction at a time
/// runs per slot, so slots double as waits-for graph nodes.
pub type SlotIndex = usize;

/// Transaction identifier. The first transaction has id 1.
pub type TrxId = u64;

/// Which of the two tables a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableId {
    A,
    B,
}

impl TableId {
    /// The sibling table.
    #[must_use]
    pub fn other(self) -> TableId {
        match self {
            TableId::A => TableId::B,
            TableId::B => TableId::A,
        }
    }
}

/// Lock mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Waiting,
    Acquired,
}

/// Transaction state as seen by the deadlock detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxState {
    Idle,
    Running,
    Waiting,
}

#[derive(Debug)]
struct LockRequest {
    table: TableId,
    record_id: u64,
    mode: LockMode,
    state: RequestState,
    trx_id: TrxId,
    slot: SlotIndex,
}

/// Handle to a lock request, valid until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockId {
    bucket: usize,
    key: SeqKey,
}

struct ParkSlot {
    woken: Mutex<bool>,
    signal: Condvar,
}

struct LockTableInner {
    buckets: Vec<SeqList<LockRequest>>,
    trx_state: Vec<TrxState>,
    waiting_for: Vec<Option<LockId>>,
}

/// The lock manager.
pub struct LockTable {
    inner: Mutex<LockTableInner>,
    parks: Vec<ParkSlot>,
    buckets_count: usize,
}

impl LockTable {
    /// Create a table with `buckets_count` hash buckets and one parking
    /// slot per worker thread.
    #[must_use]
    pub fn new(buckets_count: usize, slots_count: usize) -> Self {
        assert!(buckets_count > 0, "Lock table needs at least one bucket");
        assert!(slots_count > 0, "Lock table needs at least one slot");

        Self {
            inner: Mutex::new(LockTableInner {
                buckets: (0..buckets_count).map(|_| SeqList::new()).collect(),
                trx_state: vec![TrxState::Idle; slots_count],
                waiting_for: vec![None; slots_count],
            }),
            parks: (0..slots_count)
                .map(|_| ParkSlot {
                    woken: Mutex::new(false),
                    signal: Condvar::new(),
                })
                .collect(),
            buckets_count,
        }
    }

    /// Number of worker slots.
    #[must_use]
    pub fn slots_count(&self) -> usize {
        self.parks.len()
    }

    /// Mark a slot's transaction RUNNING (transaction begin).
    pub fn begin_slot(&self, slot: SlotIndex) {
        let mut inner = self.lock_inner();
        debug_assert!(inner.trx_state[slot] == TrxState::Idle);
        inner.trx_state[slot] = TrxState::Running;
    }

    /// Mark a slot's transaction IDLE (commit or abort finished).
    pub fn end_slot(&self, slot: SlotIndex) {
        let mut inner = self.lock_inner();
        debug_assert!(inner.waiting_for[slot].is_none());
        inner.trx_state[slot] = TrxState::Idle;
    }

    /// Acquire a lock on `(table, record_id)` in `mode` for the
    /// transaction on `slot`, blocking on conflict.
    ///
    /// Conflict against the bucket's arrival order: a shared request
    /// conflicts with the first exclusive request on the row (whatever its
    /// state); an exclusive request conflicts with any earlier request on
    /// the row. A conflicting request runs the deadlock search before it
    /// enqueues and returns [`TrxError::Deadlock`] without enqueuing if
    /// granting it would close a waits-for cycle.
    pub fn acquire(
        &self,
        table: TableId,
        record_id: u64,
        mode: LockMode,
        slot: SlotIndex,
        trx_id: TrxId,
    ) -> Result<LockId, TrxError> {
        let bucket_index = self.bucket_index(record_id);
        let mut inner = self.lock_inner();

        let conflicting = inner.buckets[bucket_index].iter().any(|(_, request)| {
            request.table == table
                && request.record_id == record_id
                && (mode == LockMode::Exclusive || request.mode == LockMode::Exclusive)
        });

        let state = if conflicting {
            if wait_cycle_from_row(&inner, bucket_index, table, record_id, slot) {
                log::debug!(
                    "deadlock victim: trx {trx_id} (slot {slot}) requesting {mode:?} on {table:?}/{record_id}"
                );
                return Err(TrxError::Deadlock);
            }
            RequestState::Waiting
        } else {
            RequestState::Acquired
        };

        let key = inner.buckets[bucket_index].push_back(LockRequest {
            table,
            record_id,
            mode,
            state,
            trx_id,
            slot,
        });
        let lock_id = LockId {
            bucket: bucket_index,
            key,
        };

        if state == RequestState::Waiting {
            inner.waiting_for[slot] = Some(lock_id);
            inner.trx_state[slot] = TrxState::Waiting;

            // Park on the slot's condition variable. The park mutex is
            // taken before the table mutex is dropped so a wake cannot
            // slip in between; the flag defeats spurious wakeups.
            let park = &self.parks[slot];
            let mut woken = park.woken.lock().expect("park mutex poisoned");
            drop(inner);
            while !*woken {
                woken = park.signal.wait(woken).expect("park mutex poisoned");
            }
            *woken = false;
            drop(woken);

            let mut inner = self.lock_inner();
            inner.waiting_for[slot] = None;
            inner.trx_state[slot] = TrxState::Running;
            inner.buckets[bucket_index].get_mut(key).state = RequestState::Acquired;
        }

        Ok(lock_id)
    }

    /// Release a lock and wake its successors.
    ///
    /// Only the earliest holder on a row wakes anyone. An exclusive
    /// releaser wakes either the single next exclusive waiter or the
    /// consecutive run of shared waiters (the first exclusive request
    /// behind that run stays parked). A shared releaser wakes the next
    /// request only if it is an exclusive one, meaning this was the last
    /// shared holder in front of it.
    pub fn release(&self, lock_id: LockId) {
        let mut inner = self.lock_inner();

        let (table, record_id, mode) = {
            let request = inner.buckets[lock_id.bucket].get(lock_id.key);
            (request.table, request.record_id, request.mode)
        };

        let first_on_row = inner.buckets[lock_id.bucket]
            .iter()
            .find(|(_, request)| request.table == table && request.record_id == record_id)
            .map(|(key, _)| key);

        let mut to_wake: Vec<SlotIndex> = Vec::new();
        if first_on_row == Some(lock_id.key) {
            let mut behind_released = false;
            for (key, request) in inner.buckets[lock_id.bucket].iter() {
                if key == lock_id.key {
                    behind_released = true;
                    continue;
                }
                if !behind_released
                    || request.table != table
                    || request.record_id != record_id
                {
                    continue;
                }

                match mode {
                    LockMode::Exclusive => {
                        if request.mode == LockMode::Exclusive {
                            if to_wake.is_empty() {
                                to_wake.push(request.slot);
                            }
                            break;
                        }
                        to_wake.push(request.slot);
                    }
                    LockMode::Shared => {
                        if request.mode == LockMode::Exclusive {
                            to_wake.push(request.slot);
                        }
                        break;
                    }
                }
            }
        }

        inner.buckets[lock_id.bucket].remove(lock_id.key);
        drop(inner);

        for slot in to_wake {
            self.wake(slot);
        }
    }

    fn wake(&self, slot: SlotIndex) {
        let park = &self.parks[slot];
        let mut woken = park.woken.lock().expect("park mutex poisoned");
        *woken = true;
        park.signal.notify_one();
    }

    /// Total requests across all buckets.
    #[must_use]
    pub fn requests_count(&self) -> usize {
        let inner = self.lock_inner();
        inner.buckets.iter().map(SeqList::len).sum()
    }

    /// Number of slots currently parked on a lock.
    #[must_use]
    pub fn waiting_slots_count(&self) -> usize {
        let inner = self.lock_inner();
        inner
            .trx_state
            .iter()
            .filter(|&&state| state == TrxState::Waiting)
            .count()
    }

    /// Consistent snapshot of the table for property checking.
    #[must_use]
    pub fn snapshot(&self) -> LockTableSnapshot {
        let inner = self.lock_inner();

        let requests = inner
            .buckets
            .iter()
            .enumerate()
            .flat_map(|(bucket, list)| {
                list.iter().map(move |(key, request)| RequestSnapshot {
                    lock_id: LockId { bucket, key },
                    table: request.table,
                    record_id: request.record_id,
                    mode: request.mode,
                    acquired: request.state == RequestState::Acquired,
                    trx_id: request.trx_id,
                    slot: request.slot,
                })
            })
            .collect();

        LockTableSnapshot {
            requests,
            trx_state: inner.trx_state.clone(),
            waiting_for: inner.waiting_for.clone(),
        }
    }

    fn bucket_index(&self, record_id: u64) -> usize {
        (record_id as usize) % self.buckets_count
    }

    fn lock_inner(&self) -> MutexGuard<'_, LockTableInner> {
        self.inner.lock().expect("lock table mutex poisoned")
    }
}

/// One request in a [`LockTableSnapshot`], in per-bucket arrival order.
#[derive(Debug, Clone, Copy)]
pub struct RequestSnapshot {
    pub lock_id: LockId,
    pub table: TableId,
    pub record_id: u64,
    pub mode: LockMode,
    pub acquired: bool,
    pub trx_id: TrxId,
    pub slot: SlotIndex,
}

/// Snapshot of the whole lock table under its mutex.
#[derive(Debug, Clone)]
pub struct LockTableSnapshot {
    pub requests: Vec<RequestSnapshot>,
    pub trx_state: Vec<TrxState>,
    pub waiting_for: Vec<Option<LockId>>,
}

/// Would granting `candidate` a lock on the given row close a waits-for
/// cycle?
///
/// The candidate's request would arrive last, so every existing request on
/// the row is a predecessor. Each predecessor's owner is an implicit
/// waits-for edge; owners that are themselves WAITING are expanded through
/// the predecessors of the lock they wait on. Reaching `candidate` again
/// is a back-edge, i.e. deadlock.
fn wait_cycle_from_row(
    inner: &LockTableInner,
    bucket_index: usize,
    table: TableId,
    record_id: u64,
    candidate: SlotIndex,
) -> bool {
    let mut visited = vec![false; inner.trx_state.len()];
    visited[candidate] = true;
    predecessors_reach(
        inner,
        bucket_index,
        table,
        record_id,
        None,
        candidate,
        &mut visited,
    )
}

/// Depth-first search over the requests on `(table, record_id)` that
/// arrived before `bound` (all of them when `bound` is `None`).
fn predecessors_reach(
    inner: &LockTableInner,
    bucket_index: usize,
    table: TableId,
    record_id: u64,
    bound: Option<SeqKey>,
    candidate: SlotIndex,
    visited: &mut [bool],
) -> bool {
    for (key, request) in inner.buckets[bucket_index].iter() {
        if Some(key) == bound {
            break;
        }
        if request.table != table || request.record_id != record_id {
            continue;
        }

        let holder = request.slot;
        if holder == candidate {
            return true;
        }
        if visited[holder] {
            continue;
        }
        visited[holder] = true;

        if inner.trx_state[holder] == TrxState::Waiting {
            if let Some(wait_lock) = inner.waiting_for[holder] {
                let (wait_table, wait_record) = {
                    let wait_request = inner.buckets[wait_lock.bucket].get(wait_lock.key);
                    (wait_request.table, wait_request.record_id)
                };
                if predecessors_reach(
                    inner,
                    wait_lock.bucket,
                    wait_table,
                    wait_record,
                    Some(wait_lock.key),
                    candidate,
                    visited,
                ) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn wait_until_parked(locks: &LockTable, waiting_count: usize) {
        for _ in 0..2000 {
            if locks.waiting_slots_count() >= waiting_count {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("waiters never parked");
    }

    #[test]
    fn test_uncontended_acquire_release_leaves_bucket_empty() {
        let locks = LockTable::new(16, 1);

        let lock = locks
            .acquire(TableId::A, 5, LockMode::Shared, 0, 1)
            .unwrap();
        assert_eq!(locks.requests_count(), 1);

        locks.release(lock);
        assert_eq!(locks.requests_count(), 0);
    }

    #[test]
    fn test_shared_holders_coexist() {
        let locks = LockTable::new(16, 2);

        let first = locks
            .acquire(TableId::A, 7, LockMode::Shared, 0, 1)
            .unwrap();
        // A second shared request on the same row must not block.
        let second = locks
            .acquire(TableId::A, 7, LockMode::Shared, 1, 2)
            .unwrap();

        locks.release(first);
        locks.release(second);
        assert_eq!(locks.requests_count(), 0);
    }

    #[test]
    fn test_same_record_different_tables_do_not_conflict() {
        let locks = LockTable::new(16, 2);

        let a = locks
            .acquire(TableId::A, 3, LockMode::Exclusive, 0, 1)
            .unwrap();
        let b = locks
            .acquire(TableId::B, 3, LockMode::Exclusive, 1, 2)
            .unwrap();

        locks.release(a);
        locks.release(b);
    }

    #[test]
    fn test_exclusive_release_wakes_shared_burst() {
        let locks = Arc::new(LockTable::new(16, 3));
        let exclusive = locks
            .acquire(TableId::A, 5, LockMode::Exclusive, 0, 1)
            .unwrap();

        let acquired = Arc::new(AtomicUsize::new(0));
        let mut readers = Vec::new();
        for slot in [1usize, 2] {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            readers.push(thread::spawn(move || {
                let lock = locks
                    .acquire(TableId::A, 5, LockMode::Shared, slot, slot as TrxId + 1)
                    .unwrap();
                acquired.fetch_add(1, Ordering::SeqCst);
                lock
            }));
        }

        wait_until_parked(&locks, 2);
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        // Releasing the exclusive lock wakes both shared waiters in one
        // burst: no pending exclusive request sits behind them.
        locks.release(exclusive);
        let shared_locks: Vec<LockId> =
            readers.into_iter().map(|r| r.join().unwrap()).collect();
        assert_eq!(acquired.load(Ordering::SeqCst), 2);

        for lock in shared_locks {
            locks.release(lock);
        }
        assert_eq!(locks.requests_count(), 0);
    }

    #[test]
    fn test_exclusive_behind_shared_burst_stays_parked() {
        let locks = Arc::new(LockTable::new(16, 4));
        let exclusive = locks
            .acquire(TableId::A, 9, LockMode::Exclusive, 0, 1)
            .unwrap();

        let mut waiters = Vec::new();
        for (slot, mode) in [(1usize, LockMode::Shared), (2, LockMode::Shared)] {
            let locks_clone = Arc::clone(&locks);
            waiters.push(thread::spawn(move || {
                locks_clone
                    .acquire(TableId::A, 9, mode, slot, slot as TrxId + 1)
                    .unwrap()
            }));
            wait_until_parked(&locks, slot);
        }
        let late_exclusive = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                locks
                    .acquire(TableId::A, 9, LockMode::Exclusive, 3, 9)
                    .unwrap()
            })
        };
        wait_until_parked(&locks, 3);

        locks.release(exclusive);
        let shared_locks: Vec<LockId> =
            waiters.into_iter().map(|w| w.join().unwrap()).collect();

        // The shared burst is in; the late exclusive waiter is not.
        assert_eq!(locks.waiting_slots_count(), 1);

        // Shared releases in arrival order: the first wakes nobody (the
        // next request on the row is still a shared holder), the last
        // hands the row to the exclusive waiter.
        locks.release(shared_locks[0]);
        assert_eq!(locks.waiting_slots_count(), 1);
        locks.release(shared_locks[1]);

        let exclusive_lock = late_exclusive.join().unwrap();
        locks.release(exclusive_lock);
        assert_eq!(locks.requests_count(), 0);
    }

    #[test]
    fn test_two_transaction_cycle_detected_on_second_request() {
        let locks = Arc::new(LockTable::new(32, 2));
        let barrier = Arc::new(Barrier::new(2));

        let forward = {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let first = locks
                    .acquire(TableId::A, 10, LockMode::Exclusive, 0, 1)
                    .unwrap();
                barrier.wait();
                // Blocks behind slot 1's lock on record 11 until slot 1
                // aborts and releases.
                let second = locks
                    .acquire(TableId::A, 11, LockMode::Exclusive, 0, 1)
                    .unwrap();
                locks.release(second);
                locks.release(first);
            })
        };

        let locks_reverse = Arc::clone(&locks);
        let reverse = thread::spawn(move || {
            let first = locks_reverse
                .acquire(TableId::A, 11, LockMode::Exclusive, 1, 2)
                .unwrap();
            barrier.wait();
            wait_until_parked(&locks_reverse, 1);

            // Slot 0 waits on record 11, which slot 1 holds; requesting
            // record 10 closes the cycle.
            let result = locks_reverse.acquire(TableId::A, 10, LockMode::Exclusive, 1, 2);
            assert_eq!(result, Err(TrxError::Deadlock));

            locks_reverse.release(first);
        });

        forward.join().unwrap();
        reverse.join().unwrap();
        assert_eq!(locks.requests_count(), 0);
    }
}
