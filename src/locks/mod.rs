//! Distributed Lock Manager Module
//!
//! Per-key mutual exclusion assembled entirely from state store entries. There is no lock
//! service: the holder, its expiry and the waiting queue are ordinary keys, and waiters sleep
//! on `wait_until_value` until they are installed as holder.
//!
//! ## State Layout (per lock key `k`)
//! - `lock_current_k`: id of the holder, absent when free.
//! - `lock_current_ttl_k`: absolute expiry of the holder (ms since the epoch).
//! - `lock_queue_k`: FIFO of waiting process ids, without duplicates.
//!
//! ## Failure Model
//! A holder that dies without releasing is recovered only by TTL expiry. TTL is granted per
//! acquisition, not per process.

pub mod manager;
pub mod types;

pub use manager::LockManager;
pub use types::{AcquireMode, ReleaseOutcome};

#[cfg(test)]
mod tests;
