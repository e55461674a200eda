//! # mk-pool
//!
//! A bounded single-producer/multi-consumer task queue with a worker pool
//! that drains remaining tasks before exiting.
//!
//! The queue is a fixed-capacity ring guarded by one mutex and one
//! condition variable. The task routine is fixed at construction; `push`
//! hands it an argument, a worker pops and runs it outside the lock.
//! Termination is graceful: the flag is raised, every worker is woken, and
//! each one keeps popping until the ring is empty before it exits.

pub mod queue;

pub use queue::{QueueError, TaskPool, TaskQueue};
