//! Stats Aggregation Module
//!
//! A scatter-gather built directly on the transport: any process can ask every other
//! process for a memory/CPU snapshot and collect the replies into one per-process table.
//!
//! ## Submodules
//! - **`types`**: Snapshot structures exchanged on the wire.
//! - **`sample`**: Samples the current process with `sysinfo` and formats byte sizes.
//! - **`collector`**: The `StatsAggregator` request routing and settle-timer collection.

pub mod collector;
pub mod sample;
pub mod types;

pub use collector::StatsAggregator;
