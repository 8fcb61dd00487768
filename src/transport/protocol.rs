//! Inter-process Wire Protocol
//!
//! Defines the messages exchanged between the coordinator and participants.
//!
//! Messages are serialized as JSON objects tagged by `type`, using the same names on
//! every link. Request/response pairs (`getState`, `setState`, `compareAndSet`) echo the
//! request's correlation id in the reply envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::ProcessId;
use crate::stats::types::StatSnapshot;

/// A message plus routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// The process that sent this envelope.
    pub from: ProcessId,
    /// Pairs a reply with its request. `None` for one-way messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<u64>,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    /// Participant announces it is ready to receive messages.
    #[serde(rename = "online")]
    Online,

    /// Participant asks the coordinator to write (or, with `value: None`, delete) a key.
    #[serde(rename = "setState")]
    SetState { key: String, value: Option<Value> },

    /// Coordinator acknowledges a `setState` once the write is applied and broadcast.
    #[serde(rename = "setState_return")]
    SetStateReturn { key: String },

    /// Participant writes `value` only if the key currently holds `expected`.
    #[serde(rename = "compareAndSet")]
    CompareAndSet {
        key: String,
        expected: Option<Value>,
        value: Option<Value>,
    },

    #[serde(rename = "compareAndSet_return")]
    CompareAndSetReturn { key: String, swapped: bool },

    /// Participant reads a key; `key: None` requests the full map.
    #[serde(rename = "getState")]
    GetState { key: Option<String> },

    #[serde(rename = "getState_return")]
    GetStateReturn {
        key: Option<String>,
        value: Option<Value>,
    },

    /// Coordinator notifies every participant of an applied write.
    #[serde(rename = "stateMutation")]
    StateMutation {
        key: String,
        value: Option<Value>,
        old: Option<Value>,
    },

    /// A mirrored event bus emission.
    #[serde(rename = "event")]
    Event { event: String, args: Vec<Value> },

    #[serde(rename = "stats", rename_all = "camelCase")]
    Stats {
        issued_by: ProcessId,
        from_id: ProcessId,
    },

    #[serde(rename = "stats_return", rename_all = "camelCase")]
    StatsReturn {
        issued_by: ProcessId,
        from_id: ProcessId,
        stats: StatSnapshot,
    },

    #[serde(rename = "main_stats")]
    MainStats,

    #[serde(rename = "main_stats_return")]
    MainStatsReturn { stats: StatSnapshot },
}

impl Message {
    /// Wire name of the message, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Online => "online",
            Message::SetState { .. } => "setState",
            Message::SetStateReturn { .. } => "setState_return",
            Message::CompareAndSet { .. } => "compareAndSet",
            Message::CompareAndSetReturn { .. } => "compareAndSet_return",
            Message::GetState { .. } => "getState",
            Message::GetStateReturn { .. } => "getState_return",
            Message::StateMutation { .. } => "stateMutation",
            Message::Event { .. } => "event",
            Message::Stats { .. } => "stats",
            Message::StatsReturn { .. } => "stats_return",
            Message::MainStats => "main_stats",
            Message::MainStatsReturn { .. } => "main_stats_return",
        }
    }
}
