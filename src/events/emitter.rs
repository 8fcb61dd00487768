//! Local Event Emitter
//!
//! Listeners never run under the registry lock, so a listener may register or remove
//! listeners (including itself) while it runs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use uuid::Uuid;

use super::types::{Listener, Registration};

#[derive(Default)]
pub struct EventEmitter {
    /// Per event, registrations in insertion order.
    handlers: RwLock<HashMap<String, Vec<(String, Registration)>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `event` and returns its key.
    ///
    /// Without a `key` a random one is generated. If `key` is already registered for
    /// `event`, a warning is logged and the old listener is kept unless `override_existing`.
    pub fn on(
        &self,
        event: &str,
        listener: Listener,
        key: Option<&str>,
        override_existing: bool,
    ) -> String {
        self.register(event, listener, key, override_existing, false)
    }

    /// Like `on`, but the listener is removed after its first call.
    pub fn once(
        &self,
        event: &str,
        listener: Listener,
        key: Option<&str>,
        override_existing: bool,
    ) -> String {
        self.register(event, listener, key, override_existing, true)
    }

    fn register(
        &self,
        event: &str,
        listener: Listener,
        key: Option<&str>,
        override_existing: bool,
        once: bool,
    ) -> String {
        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let registration = Registration { once, listener };

        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        let entries = handlers.entry(event.to_string()).or_default();

        match entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, existing)) => {
                tracing::warn!(
                    "Event handler with key {} already exists for event {}",
                    key,
                    event
                );
                if override_existing {
                    *existing = registration;
                }
            }
            None => entries.push((key.clone(), registration)),
        }

        key
    }

    /// Removes the listener registered under `key`.
    pub fn off(&self, event: &str, key: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        let Some(entries) = handlers.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| existing != key);
        entries.len() != before
    }

    /// Removes the first registration of this exact listener.
    pub fn off_listener(&self, event: &str, listener: &Listener) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        let Some(entries) = handlers.get_mut(event) else {
            return false;
        };
        match entries
            .iter()
            .position(|(_, registration)| Arc::ptr_eq(&registration.listener, listener))
        {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Calls every listener of `event` with `args`. Returns how many ran.
    pub fn emit(&self, event: &str, args: &[Value]) -> usize {
        let registrations: Vec<(String, Registration)> = {
            let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
            match handlers.get(event) {
                Some(entries) => entries.clone(),
                None => return 0,
            }
        };

        let mut fired_once = Vec::new();
        for (key, registration) in &registrations {
            (registration.listener)(args);
            if registration.once {
                fired_once.push((key, &registration.listener));
            }
        }

        if !fired_once.is_empty() {
            let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
            if let Some(entries) = handlers.get_mut(event) {
                entries.retain(|(key, registration)| {
                    !fired_once.iter().any(|(fired, listener)| {
                        *fired == key && Arc::ptr_eq(&registration.listener, listener)
                    })
                });
            }
        }

        registrations.len()
    }

    /// Drops the listeners of `event`, or of every event.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        match event {
            Some(event) => {
                handlers.remove(event);
            }
            None => handlers.clear(),
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(event)
            .map_or(0, Vec::len)
    }

    pub fn listeners(&self, event: &str) -> Vec<Listener> {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(event)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(_, registration)| registration.listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Events that currently have a registry entry, in no particular order.
    pub fn event_names(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}
