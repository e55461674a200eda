//! # mk-mvcc
//!
//! A two-variable MVCC engine. Each participant owns a version history of
//! `(a, b, vnum)` records with `a + b` equal to a fixed constant, and
//! repeatedly performs an UPDATE: take a fresh version number and a
//! snapshot of the active-participant list (both under the bakery lock),
//! read a random peer's variables at the version the snapshot resolves to,
//! fold them into its own pair, and publish the result as a new version.
//!
//! Snapshot resolution: if the peer appears in the read-view, its variables
//! are read at the last version *strictly older* than the version it was
//! working on at snapshot time; otherwise at the last version strictly
//! older than the reader's own new version number. Either way the reader
//! never observes a version that was still in flight when its snapshot was
//! taken.

pub mod engine;
pub mod invariants;

pub use engine::{ActiveEntry, MvccEngine, MvccReport, VersionRecord};
pub use invariants::MvccPropertyChecker;

use std::time::Duration;

use mk_core::{ConfigError, ParticipantId};

/// The conserved total: `a + b == DATA_TOTAL` in every recorded version.
pub const DATA_TOTAL: i64 = 1024;

/// Version number. Unique and monotone across all participants.
pub type Vnum = u64;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct MvccConfig {
    /// Number of participant threads. At least 2: every update reads a
    /// peer, and a lone participant has none to read.
    pub participants_count: usize,
    /// How long the timed run lasts.
    pub duration: Duration,
    /// Re-resolve every participant under each update's read-view and
    /// check the conserved total.
    pub verify: bool,
    /// Base seed for the per-worker random streams.
    pub seed: u64,
}

impl MvccConfig {
    /// Reject configurations the protocol cannot run under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_at_least("num_thread", 2, self.participants_count as u64)?;
        ConfigError::require_at_least("duration", 1, self.duration.as_millis() as u64)?;
        Ok(())
    }
}

/// Errors surfaced by the MVCC engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MvccError {
    /// No version of the target participant is old enough for the bound.
    /// Indicates a protocol bug; fatal for the reading participant.
    #[error("no version of participant {participant} older than {bound}")]
    MissingVersion {
        participant: ParticipantId,
        bound: Vnum,
    },

    /// A resolved version broke the conserved total (verify mode).
    #[error(
        "constant invariant violated: participant {participant} version {vnum}: {a} + {b} != {total}",
        total = DATA_TOTAL
    )]
    InvariantViolated {
        participant: ParticipantId,
        vnum: Vnum,
        a: i64,
        b: i64,
    },

    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
