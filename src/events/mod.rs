//! Event Bus Module
//!
//! A local publish/subscribe emitter on every process, mirrored across the group.
//!
//! ## Core Concepts
//! - **Local emitter**: Listeners are stored per event under a key and run in registration
//!   order. `once` listeners are dropped after their first call.
//! - **Mirroring**: A participant's emit runs locally and is forwarded to the coordinator.
//!   The coordinator runs every emit locally and rebroadcasts it to the participants.
//! - **Echo**: With `EchoPolicy::Echo` the originating participant receives its own event a
//!   second time through the rebroadcast. `SuppressOrigin` skips the originator.
//!
//! ## Submodules
//! - **`emitter`**: The local `EventEmitter`.
//! - **`bus`**: The cross-process `EventBus`.
//! - **`types`**: Listener types and the audit record.

pub mod bus;
pub mod emitter;
pub mod types;

pub use bus::{EchoPolicy, EventBus};
pub use emitter::EventEmitter;
pub use types::{AuditKind, AuditRecord, Listener};
