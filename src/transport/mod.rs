//! Transport & Roles Module
//!
//! Abstracts the bidirectional message channels between exactly one coordinator
//! process and any number of participant processes.
//!
//! ## Core Concepts
//! - **Roles**: The coordinator (reserved id 0) holds authoritative state; every other process is a participant.
//! - **Envelopes**: Each message carries its sender and an optional correlation id used to pair requests with replies.
//! - **Handler table**: Features install exactly one handler each; the pump delivers inbound messages one at a time.
//! - **Links**: `ChannelLink` routes envelopes over channels, backed either by an in-memory
//!   group (`LocalCluster`) or by child-process stdio (`process`).

pub mod link;
pub mod local;
pub mod process;
pub mod protocol;
pub mod service;
pub mod types;

pub use service::Transport;

#[cfg(test)]
mod tests;
