//! # mk-trx
//!
//! A transactional record store. Two tables of `(id, value,
//! last_updated_trx_id)` records are protected by a row lock manager with
//! shared and exclusive modes. Transactions follow strict two-phase
//! locking: every lock is held from acquisition to commit (or abort), and
//! waiters on a row are woken in arrival order, with a release of an
//! exclusive lock waking a consecutive burst of shared waiters at once.
//!
//! Conflicting requests run a depth-first search over the implicit
//! waits-for graph before they enqueue; a cycle back to the requester
//! means deadlock, and the requester aborts (behaviorally a commit, plus
//! an abort counter).

pub mod invariants;
pub mod lock_table;
pub mod table;
pub mod transaction;
pub mod workload;

pub use invariants::LockTablePropertyChecker;
pub use lock_table::{
    LockId, LockMode, LockTable, LockTableSnapshot, RequestSnapshot, SlotIndex, TableId, TrxId,
    TrxState,
};
pub use table::{Record, Table};
pub use transaction::{Database, Transaction};
pub use workload::{run_workload, TrxOutcome, TrxReport};

use std::time::Duration;

use mk_core::ConfigError;

/// Records touched by one transaction: a window of ten consecutive rows.
pub const RECORDS_PER_TRX: u64 = 10;

/// Amount moved between the two tables' copies of a row per UPDATE.
pub const TRANSFER_AMOUNT: i64 = 10;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct TrxConfig {
    /// Records per table. At least [`RECORDS_PER_TRX`], so every window
    /// `[k, k+9]` fits.
    pub table_size: u64,
    /// Number of worker threads (and transaction slots).
    pub threads_count: usize,
    /// Shared-mode reads per transaction; the remaining `10 - read_num`
    /// operations are exclusive-mode update pairs.
    pub read_count: u32,
    /// How long the timed run lasts.
    pub duration: Duration,
    /// Base seed for table contents and worker streams.
    pub seed: u64,
}

impl TrxConfig {
    /// Reject configurations the workload cannot run under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_at_least("table_size", RECORDS_PER_TRX, self.table_size)?;
        ConfigError::require_at_least("num_thread", 1, self.threads_count as u64)?;
        ConfigError::require_at_most("read_num", RECORDS_PER_TRX, u64::from(self.read_count))?;
        ConfigError::require_at_least("duration", 1, self.duration.as_millis() as u64)?;
        Ok(())
    }
}

/// Errors surfaced by the transactional store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrxError {
    /// Granting the request would close a waits-for cycle. Recoverable:
    /// the transaction aborts and may retry.
    #[error("deadlock detected")]
    Deadlock,

    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> TrxConfig {
        TrxConfig {
            table_size: 64,
            threads_count: 4,
            read_count: 5,
            duration: Duration::from_millis(100),
            seed: 1,
        }
    }

    #[test]
    fn test_valid_config_accepted() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_small_table_rejected() {
        let mut config = base_config();
        config.table_size = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_count_above_window_rejected() {
        let mut config = base_config();
        config.read_count = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_only_and_update_only_mixes_accepted() {
        let mut config = base_config();
        config.read_count = 0;
        assert!(config.validate().is_ok());
        config.read_count = 10;
        assert!(config.validate().is_ok());
    }
}
