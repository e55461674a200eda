//! The database context and the transaction lifecycle.
//!
//! A [`Database`] is the single context object holding both tables, the
//! lock manager, and the run counters. A [`Transaction`] is a worker-local
//! handle: it accumulates the locks it acquired, in order, and releases
//! them all at commit or abort. Strict two-phase locking, no early release.
//! Abort is behaviorally identical to commit; it only counts differently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::lock_table::{LockId, LockMode, LockTable, SlotIndex, TableId, TrxId};
use crate::table::Table;
use crate::{TrxConfig, TrxError, TRANSFER_AMOUNT};

/// The transactional store: tables, lock manager, counters.
pub struct Database {
    config: TrxConfig,
    table_a: Table,
    table_b: Table,
    locks: LockTable,
    trx_counter: AtomicU64,
    reads_count: AtomicU64,
    updates_count: AtomicU64,
    aborts_count: AtomicU64,
    running: AtomicBool,
}

impl Database {
    /// Build a store per the configuration.
    pub fn new(config: TrxConfig) -> Result<Self, TrxError> {
        config.validate()?;

        let mut rng = Xoshiro256StarStar::seed_from_u64(config.seed);
        let table_a = Table::new(config.table_size, &mut rng);
        let table_b = Table::new(config.table_size, &mut rng);
        let locks = LockTable::new(config.table_size as usize, config.threads_count);

        Ok(Self {
            config,
            table_a,
            table_b,
            locks,
            trx_counter: AtomicU64::new(0),
            reads_count: AtomicU64::new(0),
            updates_count: AtomicU64::new(0),
            aborts_count: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// The configuration the store was built with.
    #[must_use]
    pub fn config(&self) -> &TrxConfig {
        &self.config
    }

    /// Begin a transaction on a worker slot.
    pub fn begin(&self, slot: SlotIndex) -> Transaction<'_> {
        let trx_id = self.trx_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.locks.begin_slot(slot);

        Transaction {
            db: self,
            trx_id,
            slot,
            held: Vec::new(),
        }
    }

    /// Borrow a table by id.
    #[must_use]
    pub fn table(&self, id: TableId) -> &Table {
        match id {
            TableId::A => &self.table_a,
            TableId::B => &self.table_b,
        }
    }

    /// The lock manager, for property checks.
    #[must_use]
    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    /// Transactions begun so far.
    #[must_use]
    pub fn transactions_count(&self) -> u64 {
        self.trx_counter.load(Ordering::Relaxed)
    }

    /// Successful READ operations so far.
    #[must_use]
    pub fn reads_count(&self) -> u64 {
        self.reads_count.load(Ordering::Relaxed)
    }

    /// Successful UPDATE operations so far.
    #[must_use]
    pub fn updates_count(&self) -> u64 {
        self.updates_count.load(Ordering::Relaxed)
    }

    /// Aborted transactions so far.
    #[must_use]
    pub fn aborts_count(&self) -> u64 {
        self.aborts_count.load(Ordering::Relaxed)
    }

    pub(crate) fn running(&self) -> &AtomicBool {
        &self.running
    }
}

/// An in-flight transaction bound to one worker slot.
pub struct Transaction<'db> {
    db: &'db Database,
    trx_id: TrxId,
    slot: SlotIndex,
    held: Vec<LockId>,
}

impl Transaction<'_> {
    /// This transaction's id. The first transaction has id 1.
    #[must_use]
    pub fn trx_id(&self) -> TrxId {
        self.trx_id
    }

    /// READ: take a shared lock on the row and return its value.
    pub fn read(&mut self, table: TableId, record_id: u64) -> Result<i64, TrxError> {
        let lock = self
            .db
            .locks
            .acquire(table, record_id, LockMode::Shared, self.slot, self.trx_id)?;
        self.held.push(lock);

        let value = self.db.table(table).value(record_id);
        self.db.reads_count.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// UPDATE: exclusively lock the row in `from` and then in its sibling
    /// table, move [`TRANSFER_AMOUNT`] from the former to the latter, and
    /// stamp both copies with this transaction's id.
    pub fn update(&mut self, record_id: u64, from: TableId) -> Result<(), TrxError> {
        let first = self
            .db
            .locks
            .acquire(from, record_id, LockMode::Exclusive, self.slot, self.trx_id)?;
        self.held.push(first);

        let second = self.db.locks.acquire(
            from.other(),
            record_id,
            LockMode::Exclusive,
            self.slot,
            self.trx_id,
        )?;
        self.held.push(second);

        self.db
            .table(from)
            .add(record_id, -TRANSFER_AMOUNT, self.trx_id);
        self.db
            .table(from.other())
            .add(record_id, TRANSFER_AMOUNT, self.trx_id);

        self.db.updates_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Commit: release every held lock in acquisition order.
    pub fn commit(mut self) {
        self.finish();
    }

    /// Abort: identical to commit, plus the abort counter.
    pub fn abort(mut self) {
        log::debug!("trx {} (slot {}) aborted", self.trx_id, self.slot);
        self.db.aborts_count.fetch_add(1, Ordering::Relaxed);
        self.finish();
    }

    fn finish(&mut self) {
        for lock in self.held.drain(..) {
            self.db.locks.release(lock);
        }
        self.db.locks.end_slot(self.slot);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // Backstop for panic unwinding; `finish` is idempotent.
        if !self.held.is_empty() {
            self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_db() -> Database {
        Database::new(TrxConfig {
            table_size: 16,
            threads_count: 2,
            read_count: 5,
            duration: Duration::from_millis(100),
            seed: 42,
        })
        .unwrap()
    }

    #[test]
    fn test_trx_ids_start_at_one_and_increase() {
        let db = small_db();
        let trx = db.begin(0);
        assert_eq!(trx.trx_id(), 1);
        trx.commit();

        let trx = db.begin(0);
        assert_eq!(trx.trx_id(), 2);
        trx.commit();

        assert_eq!(db.transactions_count(), 2);
    }

    #[test]
    fn test_update_transfers_between_tables_and_stamps() {
        let db = small_db();
        let sum_before = db.table(TableId::A).value(3) + db.table(TableId::B).value(3);

        let mut trx = db.begin(0);
        let trx_id = trx.trx_id();
        trx.update(3, TableId::A).unwrap();
        trx.commit();

        let a = db.table(TableId::A).value(3);
        let b = db.table(TableId::B).value(3);
        assert_eq!(a + b, sum_before);
        assert_eq!(db.table(TableId::A).last_updated_trx_id(3), trx_id);
        assert_eq!(db.table(TableId::B).last_updated_trx_id(3), trx_id);
        assert_eq!(db.updates_count(), 1);
    }

    #[test]
    fn test_commit_leaves_no_residue_in_lock_table() {
        let db = small_db();

        let mut trx = db.begin(0);
        trx.read(TableId::A, 1).unwrap();
        trx.read(TableId::B, 2).unwrap();
        trx.update(7, TableId::B).unwrap();
        assert_eq!(db.lock_table().requests_count(), 4);

        trx.commit();
        assert_eq!(db.lock_table().requests_count(), 0);
    }

    #[test]
    fn test_read_counts_operations() {
        let db = small_db();
        let mut trx = db.begin(1);
        let value = trx.read(TableId::A, 5).unwrap();
        assert!(value >= 10_000);
        trx.commit();
        assert_eq!(db.reads_count(), 1);
    }

    #[test]
    fn test_abort_counts_and_releases() {
        let db = small_db();
        let mut trx = db.begin(0);
        trx.read(TableId::A, 1).unwrap();
        trx.abort();

        assert_eq!(db.aborts_count(), 1);
        assert_eq!(db.lock_table().requests_count(), 0);
    }
}
