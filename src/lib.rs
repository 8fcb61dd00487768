//! Worker Cluster Coordination Library
//!
//! This library crate holds the coordination substrate that lets one coordinator process
//! and N worker processes behave as a single logical file server without shared memory.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems, leaves first:
//!
//! - **`transport`**: Process identity, the JSON wire protocol and the point-to-point links
//!   between the coordinator and its participants (in-memory or child-process stdio).
//! - **`state`**: A replicated key-value store. The coordinator holds the authoritative copy;
//!   participants read and write through correlated request/response round-trips.
//! - **`locks`**: Queued mutual exclusion with TTL expiry, built purely out of state entries.
//! - **`events`**: A local publish/subscribe emitter mirrored across every process.
//! - **`index`**: The in-memory file index, seeded by a filesystem walk and kept consistent
//!   across processes through event broadcasts. Includes fuzzy search and type filters.
//! - **`stats`**: A scatter-gather of per-process memory/CPU snapshots.
//! - **`context`**: The per-process `CoordinationContext` that wires all of the above.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod index;
pub mod locks;
pub mod state;
pub mod stats;
pub mod transport;

pub use config::Config;
pub use context::CoordinationContext;
pub use error::CoordinationError;
