//! In-memory Process Group
//!
//! Runs a coordinator and its participants inside one OS process, each with its own
//! transport, inbox and pump. Behaviour is identical to the stdio-backed group apart
//! from serialization, which makes it the harness for multi-process scenarios in tests.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::link::{ChannelLink, Link};
use super::service::Transport;
use super::types::{Process, ProcessId};

pub struct LocalCluster {
    pub coordinator: Arc<Transport>,
    pub participants: Vec<Arc<Transport>>,
    coordinator_link: Arc<ChannelLink>,
    participant_links: Vec<Arc<ChannelLink>>,
    pumps: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Builds a coordinator plus `participant_count` participants with ids `1..=n`.
    ///
    /// Must be called inside a tokio runtime; every transport gets a pump task.
    pub fn spawn(participant_count: u32) -> Self {
        let (coordinator_tx, coordinator_rx) = mpsc::unbounded_channel();
        let coordinator_link = Arc::new(ChannelLink::new());

        let mut participant_links = Vec::new();
        let mut participant_inboxes = Vec::new();
        let mut participants = Vec::new();

        for n in 1..=participant_count {
            let id = ProcessId(n);
            let (tx, rx) = mpsc::unbounded_channel();
            coordinator_link.add_route(id, tx);

            let link = Arc::new(ChannelLink::new());
            link.add_route(ProcessId::COORDINATOR, coordinator_tx.clone());

            participants.push(Transport::new(Process::participant(id), link.clone()));
            participant_links.push(link);
            participant_inboxes.push(rx);
        }

        let coordinator = Transport::new(Process::coordinator(), coordinator_link.clone());

        let mut pumps = vec![coordinator.spawn_pump(coordinator_rx)];
        for (transport, inbox) in participants.iter().zip(participant_inboxes) {
            pumps.push(transport.spawn_pump(inbox));
        }

        tracing::debug!(
            "Local cluster started with {} participants",
            participant_count
        );

        Self {
            coordinator,
            participants,
            coordinator_link,
            participant_links,
            pumps,
        }
    }

    pub fn participant(&self, id: ProcessId) -> Option<&Arc<Transport>> {
        self.participants.iter().find(|transport| transport.id() == id)
    }

    /// All transports, coordinator first.
    pub fn all(&self) -> Vec<Arc<Transport>> {
        let mut all = vec![self.coordinator.clone()];
        all.extend(self.participants.iter().cloned());
        all
    }

    /// Simulates the exit of participant `id`: both directions of its channel are cut.
    pub fn disconnect(&self, id: ProcessId) {
        self.coordinator_link.disconnect(id);
        if let Some(index) = self.participants.iter().position(|t| t.id() == id) {
            self.participant_links[index].disconnect(ProcessId::COORDINATOR);
        }
        tracing::info!("Participant {} disconnected", id);
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}
