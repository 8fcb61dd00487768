use std::sync::{Arc, RwLock};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::link::Link;
use super::protocol::{Envelope, Message};
use super::types::{Process, ProcessId, Role};
use crate::error::CoordinationError;

/// Handler invoked by the pump for every inbound envelope.
///
/// Handlers run synchronously and one at a time, which is what serializes the
/// coordinator's processing of participant requests.
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// The message endpoint of one process.
pub struct Transport {
    local: Process,
    link: Arc<dyn Link>,
    handlers: RwLock<Vec<(&'static str, MessageHandler)>>,
}

impl Transport {
    pub fn new(local: Process, link: Arc<dyn Link>) -> Arc<Self> {
        Arc::new(Self {
            local,
            link,
            handlers: RwLock::new(Vec::new()),
        })
    }

    pub fn local(&self) -> Process {
        self.local
    }

    pub fn id(&self) -> ProcessId {
        self.local.id
    }

    pub fn role(&self) -> Role {
        self.local.role
    }

    pub fn is_coordinator(&self) -> bool {
        self.local.role == Role::Coordinator
    }

    pub fn is_participant(&self) -> bool {
        self.local.role == Role::Participant
    }

    pub fn participants(&self) -> Vec<ProcessId> {
        self.link.participants()
    }

    pub fn disconnect(&self, id: ProcessId) {
        self.link.disconnect(id);
    }

    pub fn send(&self, to: ProcessId, message: Message) -> Result<()> {
        self.send_envelope(
            to,
            Envelope {
                from: self.local.id,
                correlation: None,
                message,
            },
        )
    }

    /// Sends a request or reply tagged with `correlation`.
    pub fn send_correlated(
        &self,
        to: ProcessId,
        correlation: u64,
        message: Message,
    ) -> Result<()> {
        self.send_envelope(
            to,
            Envelope {
                from: self.local.id,
                correlation: Some(correlation),
                message,
            },
        )
    }

    fn send_envelope(&self, to: ProcessId, envelope: Envelope) -> Result<()> {
        tracing::trace!(
            "{} -> {}: {}",
            self.local.id,
            to,
            envelope.message.kind()
        );
        self.link.send(to, envelope)?;
        Ok(())
    }

    /// Sends `message` to every participant. Coordinator only.
    pub fn broadcast(&self, message: Message) -> Result<()> {
        self.broadcast_except(message, None)
    }

    /// Like `broadcast`, but skips `skip`.
    ///
    /// A participant that cannot be reached is logged and skipped; the others still
    /// receive the message.
    pub fn broadcast_except(&self, message: Message, skip: Option<ProcessId>) -> Result<()> {
        if !self.is_coordinator() {
            return Err(CoordinationError::NotCoordinator.into());
        }

        for id in self.link.participants() {
            if Some(id) == skip {
                continue;
            }
            let envelope = Envelope {
                from: self.local.id,
                correlation: None,
                message: message.clone(),
            };
            if let Err(e) = self.link.send(id, envelope) {
                tracing::warn!("Broadcast of {} to {} failed: {}", message.kind(), id, e);
            }
        }

        Ok(())
    }

    /// Installs the handler for `feature`.
    ///
    /// Returns `false` and keeps the existing handler when the feature is already
    /// installed on this transport.
    pub fn on_message(&self, feature: &'static str, handler: MessageHandler) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if handlers.iter().any(|(name, _)| *name == feature) {
            tracing::debug!(
                "Handler for '{}' already installed on process {}",
                feature,
                self.local.id
            );
            return false;
        }

        handlers.push((feature, handler));
        tracing::debug!("Installed '{}' handler on process {}", feature, self.local.id);
        true
    }

    pub fn has_handler(&self, feature: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|(name, _)| *name == feature)
    }

    /// Hands `envelope` to every installed handler.
    pub fn dispatch(&self, envelope: &Envelope) {
        // Handlers may install further handlers, so never call them under the lock.
        let handlers: Vec<MessageHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(envelope);
        }
    }

    /// Drains `inbox` and dispatches each envelope in arrival order.
    pub fn spawn_pump(
        self: &Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
    ) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                tracing::trace!(
                    "{} <- {}: {}",
                    transport.local.id,
                    envelope.from,
                    envelope.message.kind()
                );
                transport.dispatch(&envelope);
            }
            tracing::debug!("Inbox of process {} closed", transport.local.id);
        })
    }
}
