//! Participant State Client
//!
//! Holds no copy of the map. Every `get` and `set` is a request to the coordinator tagged
//! with a correlation id; the reply resolves the matching pending request. Mutation
//! notifications pushed by the coordinator feed the local watcher channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use super::store::{MUTATION_FEED_CAPACITY, STATE_FEATURE, StateStore};
use super::types::StateMutation;
use crate::error::CoordinationError;
use crate::transport::Transport;
use crate::transport::protocol::{Envelope, Message};
use crate::transport::types::ProcessId;

pub struct ParticipantState {
    transport: Arc<Transport>,
    pending: DashMap<u64, oneshot::Sender<Option<Value>>>,
    next_request: AtomicU64,
    mutations: broadcast::Sender<StateMutation>,
}

impl ParticipantState {
    pub fn new(transport: Arc<Transport>) -> Arc<Self> {
        let (mutations, _) = broadcast::channel(MUTATION_FEED_CAPACITY);
        let state = Arc::new(Self {
            transport: transport.clone(),
            pending: DashMap::new(),
            next_request: AtomicU64::new(1),
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

    /// Requests still waiting for the coordinator.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Sends `message` and suspends until the correlated reply arrives.
    ///
    /// There is no timeout: if the coordinator is gone the call never completes.
    async fn request(&self, message: Message) -> Result<Option<Value>> {
        let correlation = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(correlation, sender);

        if let Err(e) =
            self.transport
                .send_correlated(ProcessId::COORDINATOR, correlation, message)
        {
            self.pending.remove(&correlation);
            return Err(e);
        }

        receiver
            .await
            .map_err(|_| CoordinationError::RequestDropped(correlation).into())
    }

    fn handle_message(&self, envelope: &Envelope) {
        match &envelope.message {
            Message::StateMutation { key, value, old } => {
                let _ = self.mutations.send(StateMutation {
                    key: key.clone(),
                    value: value.clone(),
                    old: old.clone(),
                });
            }
            Message::SetStateReturn { .. } => self.resolve(envelope.correlation, None),
            Message::CompareAndSetReturn { swapped, .. } => {
                self.resolve(envelope.correlation, Some(Value::Bool(*swapped)))
            }
            Message::GetStateReturn { value, .. } => {
                self.resolve(envelope.correlation, value.clone())
            }
            _ => {}
        }
    }

    fn resolve(&self, correlation: Option<u64>, value: Option<Value>) {
        let Some(correlation) = correlation else {
            tracing::warn!("State reply without correlation id");
            return;
        };

        match self.pending.remove(&correlation) {
            Some((_, sender)) => {
                let _ = sender.send(value);
            }
            None => tracing::warn!("No pending state request {}", correlation),
        }
    }
}

#[async_trait]
impl StateStore for ParticipantState {
    async fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.request(Message::SetState {
            key: key.to_string(),
            value,
        })
        .await?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Value>,
        value: Option<Value>,
    ) -> Result<bool> {
        let reply = self
            .request(Message::CompareAndSet {
                key: key.to_string(),
                expected,
                value,
            })
            .await?;
        Ok(matches!(reply, Some(Value::Bool(true))))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.request(Message::GetState {
            key: Some(key.to_string()),
        })
        .await
    }

    async fn snapshot(&self) -> Result<HashMap<String, Value>> {
        let value = self.request(Message::GetState { key: None }).await?;
        match value {
            Some(Value::Object(map)) => Ok(map.into_iter().collect()),
            Some(other) => Err(anyhow::anyhow!("Unexpected state snapshot: {}", other)),
            None => Ok(HashMap::new()),
        }
    }

    fn mutations(&self) -> broadcast::Receiver<StateMutation> {
        self.mutations.subscribe()
    }
}
