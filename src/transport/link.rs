//! Point-to-point Links
//!
//! A `Link` knows how to hand an envelope to one specific process. The coordinator's
//! link has a route per participant; a participant's link has a single route to the
//! coordinator. The links never interpret messages.

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::protocol::Envelope;
use super::types::ProcessId;
use crate::error::CoordinationError;

pub trait Link: Send + Sync {
    /// Queues `envelope` for delivery to `to`. Never blocks.
    fn send(&self, to: ProcessId, envelope: Envelope) -> Result<(), CoordinationError>;

    /// Participants reachable through this link, in ascending id order.
    fn participants(&self) -> Vec<ProcessId>;

    /// Forgets a route, e.g. after the peer exited.
    fn disconnect(&self, id: ProcessId);
}

/// Link backed by unbounded channels, one per peer.
///
/// Whatever drains the receiving ends (an in-memory pump or a stdio writer task)
/// decides how the envelope actually travels.
#[derive(Default)]
pub struct ChannelLink {
    routes: DashMap<ProcessId, mpsc::UnboundedSender<Envelope>>,
}

impl ChannelLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&self, id: ProcessId, sender: mpsc::UnboundedSender<Envelope>) {
        self.routes.insert(id, sender);
    }

    pub fn has_route(&self, id: ProcessId) -> bool {
        self.routes.contains_key(&id)
    }
}

impl Link for ChannelLink {
    fn send(&self, to: ProcessId, envelope: Envelope) -> Result<(), CoordinationError> {
        let route = self
            .routes
            .get(&to)
            .ok_or(CoordinationError::UnknownProcess(to))?;

        route
            .send(envelope)
            .map_err(|_| CoordinationError::ChannelClosed(to))
    }

    fn participants(&self) -> Vec<ProcessId> {
        let mut ids: Vec<ProcessId> = self
            .routes
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| !id.is_coordinator())
            .collect();
        ids.sort();
        ids
    }

    fn disconnect(&self, id: ProcessId) {
        if self.routes.remove(&id).is_some() {
            tracing::debug!("Removed route to process {}", id);
        }
    }
}
