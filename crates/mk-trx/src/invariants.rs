//! Lock-table invariants as checkable properties.
//!
//! | Property | Description |
//! |----------|-------------|
//! | SingleExclusiveOwner | At most one acquired lock on a row that has an acquired exclusive |
//! | FifoNoOvertake | No acquired request behind a waiter on the same row |
//! | WaitingConsistent | A WAITING slot points at its own pending request, and vice versa |
//!
//! Checks run on a [`LockTableSnapshot`] taken under the table mutex.
//! `FifoNoOvertake` assumes the table is between wake handoffs (a woken
//! waiter marks itself acquired only after re-taking the mutex), which is
//! the state test checkpoints observe.

use std::collections::HashMap;

use mk_core::{PropertyChecker, PropertyResult};

use crate::lock_table::{LockMode, LockTable, LockTableSnapshot, TableId, TrxState};

const KERNEL: &str = "lock_table";

/// Property checker over a lock-table snapshot.
pub struct LockTablePropertyChecker {
    snapshot: LockTableSnapshot,
}

impl LockTablePropertyChecker {
    /// Snapshot the table and build a checker.
    #[must_use]
    pub fn new(table: &LockTable) -> Self {
        Self {
            snapshot: table.snapshot(),
        }
    }

    /// An acquired exclusive lock shares its row with no other acquired
    /// lock, in either mode.
    fn check_single_exclusive_owner(&self) -> PropertyResult {
        let mut acquired_on_row: HashMap<(TableId, u64), (u64, bool)> = HashMap::new();

        for request in self.snapshot.requests.iter().filter(|r| r.acquired) {
            let entry = acquired_on_row
                .entry((request.table, request.record_id))
                .or_insert((0, false));
            entry.0 += 1;
            entry.1 |= request.mode == LockMode::Exclusive;
        }

        for ((table, record_id), (count, has_exclusive)) in acquired_on_row {
            if has_exclusive && count > 1 {
                return PropertyResult::fail(
                    "SingleExclusiveOwner",
                    KERNEL,
                    format!("{table:?}/{record_id}: {count} acquired locks alongside an exclusive"),
                );
            }
        }
        PropertyResult::pass("SingleExclusiveOwner", KERNEL)
    }

    /// Within a row's arrival-order queue, every acquired request precedes
    /// every waiting one.
    fn check_fifo_no_overtake(&self) -> PropertyResult {
        let mut waiting_seen: HashMap<(TableId, u64), bool> = HashMap::new();

        for request in &self.snapshot.requests {
            let row = (request.table, request.record_id);
            let seen = waiting_seen.entry(row).or_insert(false);
            if request.acquired && *seen {
                return PropertyResult::fail(
                    "FifoNoOvertake",
                    KERNEL,
                    format!(
                        "{:?}/{}: trx {} acquired behind a waiter",
                        request.table, request.record_id, request.trx_id
                    ),
                );
            }
            *seen |= !request.acquired;
        }
        PropertyResult::pass("FifoNoOvertake", KERNEL)
    }

    /// WAITING slots and pending requests agree: a waiting slot points at
    /// exactly its own un-acquired request, and every un-acquired request
    /// belongs to a waiting slot.
    fn check_waiting_consistent(&self) -> PropertyResult {
        for (slot, state) in self.snapshot.trx_state.iter().enumerate() {
            let waiting_for = self.snapshot.waiting_for[slot];
            if (*state == TrxState::Waiting) != waiting_for.is_some() {
                return PropertyResult::fail(
                    "WaitingConsistent",
                    KERNEL,
                    format!("slot {slot}: state {state:?} but waiting_for {waiting_for:?}"),
                );
            }

            if let Some(lock_id) = waiting_for {
                let pending = self
                    .snapshot
                    .requests
                    .iter()
                    .find(|request| request.lock_id == lock_id);
                match pending {
                    Some(request) if request.slot == slot && !request.acquired => {}
                    _ => {
                        return PropertyResult::fail(
                            "WaitingConsistent",
                            KERNEL,
                            format!("slot {slot}: waiting_for does not match a pending request"),
                        );
                    }
                }
            }
        }
        PropertyResult::pass("WaitingConsistent", KERNEL)
    }
}

impl PropertyChecker for LockTablePropertyChecker {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_single_exclusive_owner(),
            self.check_fifo_no_overtake(),
            self.check_waiting_consistent(),
        ]
    }
}
