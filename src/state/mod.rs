//! Replicated State Store Module
//!
//! A single logical key-value map. The coordinator owns the authoritative copy; participants
//! reach it through correlated request/response round-trips and receive every applied write
//! as a `stateMutation` notification.
//!
//! ## Core Concepts
//! - **Single writer**: Only the coordinator mutates the map. Writes arriving from participants
//!   are applied one at a time by the coordinator's pump, so per-key order is total.
//! - **Read-your-writes**: A participant `set` resolves only after the coordinator's ack.
//! - **Condition waits**: `wait_until_value`/`wait_until_cb` are the condition-variable
//!   primitive the lock manager builds on.
//!
//! ## Submodules
//! - **`store`**: The `StateStore` trait, shared wait/watch logic and role selection.
//! - **`coordinator`**: The authoritative implementation.
//! - **`participant`**: The request/response client implementation.
//! - **`types`**: Mutation records and watch handles.

pub mod coordinator;
pub mod participant;
pub mod store;
pub mod types;

pub use coordinator::CoordinatorState;
pub use participant::ParticipantState;
pub use store::{StateStore, state_store};
pub use types::{StateMutation, WatchHandle};
