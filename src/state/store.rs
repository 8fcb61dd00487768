use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::coordinator::CoordinatorState;
use super::participant::ParticipantState;
use super::types::{StateMutation, WatchCallback, WatchHandle};
use crate::error::CoordinationError;
use crate::transport::Transport;

pub const STATE_FEATURE: &str = "state";

/// Capacity of the local mutation feed before slow subscribers start lagging.
pub const MUTATION_FEED_CAPACITY: usize = 1024;

/// The state store contract, identical on both roles.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Writes `value` under `key`; `None` deletes the key.
    async fn set(&self, key: &str, value: Option<Value>) -> Result<()>;

    /// Writes `value` only if `key` currently holds `expected` (`None`: absent).
    ///
    /// The comparison and the write happen in one step on the coordinator.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<Value>,
        value: Option<Value>,
    ) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// The full map, for diagnostics.
    async fn snapshot(&self) -> Result<HashMap<String, Value>>;

    /// Local feed of applied mutations.
    fn mutations(&self) -> broadcast::Receiver<StateMutation>;

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.set(key, None).await
    }

    /// Resolves once `key` holds `value` (`None`: once the key is absent).
    async fn wait_until_value(
        &self,
        key: &str,
        value: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let expected = value;
        self.wait_until_cb(key, &move |current| current == expected.as_ref(), timeout)
            .await
    }

    /// Resolves once `predicate` accepts the value of `key`.
    ///
    /// With `timeout: None` this waits for as long as it takes.
    async fn wait_until_cb(
        &self,
        key: &str,
        predicate: &(dyn for<'v> Fn(Option<&'v Value>) -> bool + Send + Sync),
        timeout: Option<Duration>,
    ) -> Result<()> {
        // Subscribe before reading so a write landing in between is still seen.
        let mut mutations = self.mutations();
        if predicate(self.get(key).await?.as_ref()) {
            return Ok(());
        }

        let wait = async {
            loop {
                match mutations.recv().await {
                    Ok(mutation) => {
                        if mutation.key == key && predicate(mutation.value.as_ref()) {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Waiter on '{}' lagged by {} mutations, re-reading",
                            key,
                            skipped
                        );
                        if predicate(self.get(key).await?.as_ref()) {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Closed) => {
                        return Err(anyhow::anyhow!("State mutation feed closed"));
                    }
                }
            }
        };

        match timeout {
            None => wait.await,
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                anyhow::Error::from(CoordinationError::WaitTimedOut {
                    key: key.to_string(),
                })
            })?,
        }
    }

    /// Calls `callback(new, old)` for every later mutation of `key`.
    fn watch(&self, key: &str, callback: WatchCallback) -> WatchHandle {
        let mut mutations = self.mutations();
        let key = key.to_string();
        let task = tokio::spawn(async move {
            loop {
                match mutations.recv().await {
                    Ok(mutation) if mutation.key == key => callback(mutation.value, mutation.old),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Watcher on '{}' skipped {} mutations", key, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        WatchHandle { task }
    }
}

/// Picks the implementation matching the transport's role.
pub fn state_store(transport: Arc<Transport>) -> Arc<dyn StateStore> {
    if transport.is_coordinator() {
        CoordinatorState::new(transport)
    } else {
        ParticipantState::new(transport)
    }
}
