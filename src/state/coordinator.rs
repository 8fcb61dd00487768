//! Authoritative State
//!
//! Lives only on the coordinator. Every write, local or requested by a participant, is
//! applied and broadcast under one write lock, so participants see the mutations of a key
//! in exactly the order they were applied here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::store::{MUTATION_FEED_CAPACITY, STATE_FEATURE, StateStore};
use super::types::StateMutation;
use crate::transport::Transport;
use crate::transport::protocol::{Envelope, Message};

pub struct CoordinatorState {
    entries: RwLock<HashMap<String, Value>>,
    transport: Arc<Transport>,
    mutations: broadcast::Sender<StateMutation>,
}

impl CoordinatorState {
    pub fn new(transport: Arc<Transport>) -> Arc<Self> {
        let (mutations, _) = broadcast::channel(MUTATION_FEED_CAPACITY);
        let state = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            transport: transport.clone(),
            mutations,
        });

        let weak: Weak<Self> = Arc::downgrade(&state);
        transport.on_message(
            STATE_FEATURE,
            Arc::new(move |envelope: &Envelope| {
                if let Some(state) = weak.upgrade() {
                    state.handle_message(envelope);
                }
            }),
        );

        state
    }

    /// Applies a write, notifies every participant and local watchers, and returns the mutation.
    pub fn apply(&self, key: &str, value: Option<Value>) -> StateMutation {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        self.apply_locked(&mut entries, key, value)
    }

    /// Applies the write only if `key` currently holds `expected`. Returns whether it did.
    pub fn compare_and_apply(
        &self,
        key: &str,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if entries.get(key) != expected {
            return false;
        }
        self.apply_locked(&mut entries, key, value);
        true
    }

    fn apply_locked(
        &self,
        entries: &mut HashMap<String, Value>,
        key: &str,
        value: Option<Value>,
    ) -> StateMutation {
        let old = match value.clone() {
            Some(value) => entries.insert(key.to_string(), value),
            None => entries.remove(key),
        };

        let mutation = StateMutation {
            key: key.to_string(),
            value,
            old,
        };

        if let Err(e) = self.transport.broadcast(Message::StateMutation {
            key: mutation.key.clone(),
            value: mutation.value.clone(),
            old: mutation.old.clone(),
        }) {
            tracing::error!("Failed to broadcast mutation of '{}': {}", key, e);
        }

        // No local subscribers is fine.
        let _ = self.mutations.send(mutation.clone());

        tracing::trace!("State '{}' updated", key);
        mutation
    }

    pub fn read(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    pub fn read_all(&self) -> HashMap<String, Value> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle_message(&self, envelope: &Envelope) {
        let Some(correlation) = envelope.correlation else {
            if matches!(
                envelope.message,
                Message::SetState { .. }
                    | Message::CompareAndSet { .. }
                    | Message::GetState { .. }
            ) {
                tracing::warn!(
                    "Ignoring uncorrelated {} from {}",
                    envelope.message.kind(),
                    envelope.from
                );
            }
            return;
        };

        let reply = match &envelope.message {
            Message::SetState { key, value } => {
                self.apply(key, value.clone());
                Message::SetStateReturn { key: key.clone() }
            }
            Message::CompareAndSet {
                key,
                expected,
                value,
            } => Message::CompareAndSetReturn {
                key: key.clone(),
                swapped: self.compare_and_apply(key, expected.as_ref(), value.clone()),
            },
            Message::GetState { key: Some(key) } => Message::GetStateReturn {
                key: Some(key.clone()),
                value: self.read(key),
            },
            Message::GetState { key: None } => {
                let map: serde_json::Map<String, Value> = self.read_all().into_iter().collect();
                Message::GetStateReturn {
                    key: None,
                    value: Some(Value::Object(map)),
                }
            }
            _ => return,
        };

        if let Err(e) = self
            .transport
            .send_correlated(envelope.from, correlation, reply)
        {
            tracing::error!("Failed to answer process {}: {}", envelope.from, e);
        }
    }
}

#[async_trait]
impl StateStore for CoordinatorState {
    async fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.apply(key, value);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Value>,
        value: Option<Value>,
    ) -> Result<bool> {
        Ok(self.compare_and_apply(key, expected.as_ref(), value))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read(key))
    }

    async fn snapshot(&self) -> Result<HashMap<String, Value>> {
        Ok(self.read_all())
    }

    fn mutations(&self) -> broadcast::Receiver<StateMutation> {
        self.mutations.subscribe()
    }
}
