//! Cross-process Event Bus
//!
//! Wraps a local `EventEmitter` with the mirroring layer. The transport handler is
//! installed once per process; a second bus on the same transport shares nothing and
//! receives no remote events.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::emitter::EventEmitter;
use super::types::{AuditKind, AuditRecord, Listener};
use crate::transport::Transport;
use crate::transport::protocol::{Envelope, Message};
use crate::transport::types::ProcessId;

pub const EVENTS_FEATURE: &str = "events";

/// Event emitted for every user action on a file or folder.
pub const AUDIT_EVENT: &str = "audit";

/// Whether the coordinator's rebroadcast also reaches the participant that emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// The originator sees its own event twice: locally and through the rebroadcast.
    #[default]
    Echo,
    /// The rebroadcast skips the originator.
    SuppressOrigin,
}

pub struct EventBus {
    transport: Arc<Transport>,
    local: EventEmitter,
    echo: EchoPolicy,
}

impl EventBus {
    pub fn new(transport: Arc<Transport>, echo: EchoPolicy) -> Arc<Self> {
        let bus = Arc::new(Self {
            transport: transport.clone(),
            local: EventEmitter::new(),
            echo,
        });

        let weak: Weak<Self> = Arc::downgrade(&bus);
        let installed = transport.on_message(
            EVENTS_FEATURE,
            Arc::new(move |envelope: &Envelope| {
                if let Some(bus) = weak.upgrade() {
                    bus.handle_message(envelope);
                }
            }),
        );
        if !installed {
            tracing::warn!(
                "Event forwarding already installed on process {}",
                transport.id()
            );
        }

        bus
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.echo
    }

    /// The local emitter, without mirroring.
    pub fn emitter(&self) -> &EventEmitter {
        &self.local
    }

    /// Runs local listeners, then mirrors the event to the rest of the group.
    ///
    /// Forwarding is fire-and-forget: failures are logged, never returned.
    pub fn emit(&self, event: &str, args: Vec<Value>) {
        self.local.emit(event, &args);

        let message = Message::Event {
            event: event.to_string(),
            args,
        };
        let forwarded = if self.transport.is_coordinator() {
            self.transport.broadcast(message)
        } else {
            self.transport.send(ProcessId::COORDINATOR, message)
        };

        if let Err(e) = forwarded {
            tracing::warn!("Failed to forward event '{}': {}", event, e);
        }
    }

    pub fn emit_audit(&self, user: &str, operation: &str, kind: AuditKind) {
        let record = AuditRecord {
            user: user.to_string(),
            operation: operation.to_string(),
            kind,
        };
        tracing::info!("[{}] {}", record.user, record.operation);
        self.emit(AUDIT_EVENT, record.to_args());
    }

    fn handle_message(&self, envelope: &Envelope) {
        let Message::Event { event, args } = &envelope.message else {
            return;
        };

        self.local.emit(event, args);

        if self.transport.is_coordinator() {
            let skip = match self.echo {
                EchoPolicy::Echo => None,
                EchoPolicy::SuppressOrigin => Some(envelope.from),
            };
            if let Err(e) = self.transport.broadcast_except(envelope.message.clone(), skip) {
                tracing::warn!("Failed to rebroadcast event '{}': {}", event, e);
            }
        }
    }

    pub fn on(&self, event: &str, listener: Listener) -> String {
        self.local.on(event, listener, None, false)
    }

    pub fn on_keyed(
        &self,
        event: &str,
        listener: Listener,
        key: &str,
        override_existing: bool,
    ) -> String {
        self.local.on(event, listener, Some(key), override_existing)
    }

    pub fn once(&self, event: &str, listener: Listener) -> String {
        self.local.once(event, listener, None, false)
    }

    pub fn off(&self, event: &str, key: &str) -> bool {
        self.local.off(event, key)
    }

    pub fn off_listener(&self, event: &str, listener: &Listener) -> bool {
        self.local.off_listener(event, listener)
    }

    pub fn remove_all_listeners(&self, event: Option<&str>) {
        self.local.remove_all_listeners(event)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.local.listener_count(event)
    }

    pub fn event_names(&self) -> Vec<String> {
        self.local.event_names()
    }
}
