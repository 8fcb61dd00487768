//! Per-process Wiring
//!
//! Builds every coordination service on top of one transport, each exactly once.
//! Services are created leaves first: state, then locks and the event bus, then the
//! index and stats that depend on them.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::events::EventBus;
use crate::index::FileIndex;
use crate::locks::LockManager;
use crate::state::{StateStore, state_store};
use crate::stats::StatsAggregator;
use crate::transport::Transport;
use crate::transport::types::ProcessId;

pub struct CoordinationContext {
    pub transport: Arc<Transport>,
    pub state: Arc<dyn StateStore>,
    pub locks: Arc<LockManager>,
    pub events: Arc<EventBus>,
    pub index: Arc<FileIndex>,
    pub stats: Arc<StatsAggregator>,
}

impl CoordinationContext {
    pub fn new(transport: Arc<Transport>, config: &Config) -> Self {
        let state = state_store(transport.clone());
        let locks = LockManager::new(
            state.clone(),
            transport.id(),
            config.lock_ttl(),
            config.lock_poll_interval(),
            config.acquire_mode(),
        );
        let events = EventBus::new(transport.clone(), config.echo_policy());
        let index = FileIndex::new(
            config.storage_path.clone(),
            config.index_depth,
            events.clone(),
            transport.id(),
        );
        let stats = StatsAggregator::new(transport.clone(), config.stats_settle());

        tracing::info!(
            "Coordination services ready on process {} ({:?})",
            transport.id(),
            transport.role()
        );

        Self {
            transport,
            state,
            locks,
            events,
            index,
            stats,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.transport.id()
    }

    /// Seeds the file index from the storage root.
    pub async fn init_index(&self) -> Result<usize> {
        self.index.init().await
    }

    pub fn shutdown(&self) {
        self.locks.shutdown();
        tracing::info!("Process {} shut down", self.transport.id());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::index::DiscoveredFile;
    use crate::transport::local::LocalCluster;

    #[tokio::test]
    async fn test_contexts_share_state_locks_events_and_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seed.txt"), b"x").unwrap();
        let config = Config {
            storage_path: dir.path().to_path_buf(),
            lock_poll_ms: 10,
            ..Config::default()
        };

        let cluster = LocalCluster::spawn(2);
        let contexts: Vec<CoordinationContext> = cluster
            .all()
            .into_iter()
            .map(|transport| CoordinationContext::new(transport, &config))
            .collect();
        for context in &contexts {
            assert_eq!(context.init_index().await.unwrap(), 2);
        }

        // ARRANGE: an audit listener on the coordinator
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        contexts[0].events.on(
            "uploaded",
            std::sync::Arc::new(move |args: &[Value]| {
                let _ = tx.send(args.to_vec());
            }),
        );

        // ACT: participant 1 does a guarded upload
        let worker = &contexts[1];
        worker
            .locks
            .with_lock("upload", None, async {
                worker.state.set("last_upload", Some(json!("a.csv"))).await.unwrap();
                worker.index.add(vec![DiscoveredFile::file("a.csv")]);
                worker.events.emit("uploaded", vec![json!("a.csv")]);
            })
            .await
            .unwrap();

        // ASSERT
        let args = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(args, vec![json!("a.csv")]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        for context in &contexts {
            assert_eq!(
                context.state.get("last_upload").await.unwrap(),
                Some(json!("a.csv"))
            );
            assert!(context.index.get("a.csv").is_some());
            assert_eq!(context.locks.holder("upload").await.unwrap(), None);
        }

        for context in &contexts {
            context.shutdown();
        }
    }
}
