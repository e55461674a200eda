//! # mk-sync
//!
//! Synchronization building blocks for the concurrency kernels:
//!
//! - [`SeqList`]: an ordered sequence with stable keys and O(1) unlink,
//!   for state whose mutation is serialized externally (lock-table buckets,
//!   the bakery-guarded active list).
//! - [`PublishList`]: a prepend-only list whose head is published with a
//!   release CAS, for single-writer/many-reader version histories.
//! - [`BakeryLock`] / [`BakeryCell`]: Lamport's bakery algorithm. Software
//!   mutual exclusion for a fixed set of participants, no compare-and-swap
//!   in the protocol itself.

pub mod bakery;
pub mod publish_list;
pub mod seqlist;

pub use bakery::{BakeryCell, BakeryCellGuard, BakeryGuard, BakeryLock};
pub use publish_list::PublishList;
pub use seqlist::{SeqKey, SeqList};
