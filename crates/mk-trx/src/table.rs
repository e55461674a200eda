//! Record tables.
//!
//! A table is a fixed array of records indexed by 1-based record id. Field
//! access goes through relaxed atomics: every read happens under the row's
//! shared or exclusive lock and every write under the exclusive lock, so
//! the lock manager's mutex already provides the ordering. The atomics
//! only keep the rows shareable across threads without `unsafe`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::TrxId;

/// Initial record values are drawn uniformly from this range.
const VALUE_INITIAL_MIN: i64 = 10_000;
const VALUE_INITIAL_MAX: i64 = 100_000;

/// One row: `(id, value, last_updated_trx_id)`.
#[derive(Debug)]
pub struct Record {
    id: u64,
    value: AtomicI64,
    last_updated_trx_id: AtomicU64,
}

impl Record {
    /// 1-based record id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A fixed-size table of records.
#[derive(Debug)]
pub struct Table {
    rows: Vec<Record>,
}

impl Table {
    /// Create a table of `table_size` records with random initial values.
    #[must_use]
    pub fn new(table_size: u64, rng: &mut Xoshiro256StarStar) -> Self {
        debug_assert!(table_size > 0, "Table needs at least one record");

        let rows = (1..=table_size)
            .map(|id| Record {
                id,
                value: AtomicI64::new(rng.gen_range(VALUE_INITIAL_MIN..VALUE_INITIAL_MAX)),
                last_updated_trx_id: AtomicU64::new(0),
            })
            .collect();

        Self { rows }
    }

    /// Number of records.
    #[must_use]
    pub fn records_count(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Read a record's value. Caller holds the row's S or X lock.
    #[must_use]
    pub fn value(&self, record_id: u64) -> i64 {
        self.row(record_id).value.load(Ordering::Relaxed)
    }

    /// Transaction id that last updated the record.
    #[must_use]
    pub fn last_updated_trx_id(&self, record_id: u64) -> TrxId {
        self.row(record_id).last_updated_trx_id.load(Ordering::Relaxed)
    }

    /// Add `delta` to a record and stamp it. Caller holds the row's X lock.
    pub fn add(&self, record_id: u64, delta: i64, trx_id: TrxId) {
        let row = self.row(record_id);
        let value = row.value.load(Ordering::Relaxed);
        row.value.store(value + delta, Ordering::Relaxed);
        row.last_updated_trx_id.store(trx_id, Ordering::Relaxed);
    }

    /// Sum of all record values. Only meaningful while quiesced.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.rows
            .iter()
            .map(|row| row.value.load(Ordering::Relaxed))
            .sum()
    }

    fn row(&self, record_id: u64) -> &Record {
        debug_assert!(
            record_id >= 1 && record_id <= self.rows.len() as u64,
            "Record id out of range"
        );
        &self.rows[(record_id - 1) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_new_table_has_sequential_ids_and_bounded_values() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        let table = Table::new(32, &mut rng);

        assert_eq!(table.records_count(), 32);
        for id in 1..=32 {
            let value = table.value(id);
            assert!((VALUE_INITIAL_MIN..VALUE_INITIAL_MAX).contains(&value));
            assert_eq!(table.last_updated_trx_id(id), 0);
        }
    }

    #[test]
    fn test_add_moves_value_and_stamps_trx() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        let table = Table::new(4, &mut rng);

        let before = table.value(2);
        table.add(2, -10, 77);
        assert_eq!(table.value(2), before - 10);
        assert_eq!(table.last_updated_trx_id(2), 77);
    }
}
