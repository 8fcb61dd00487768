use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A listener receives the positional arguments of an emit.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

#[derive(Clone)]
pub struct Registration {
    pub once: bool,
    pub listener: Listener,
}

/// What a user did to a file or folder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Create,
    Delete,
    Download,
    Update,
}

/// Payload of the `audit` event, sent as `[user, operation, kind]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub user: String,
    pub operation: String,
    pub kind: AuditKind,
}

impl AuditRecord {
    pub fn to_args(&self) -> Vec<Value> {
        vec![
            Value::from(self.user.clone()),
            Value::from(self.operation.clone()),
            serde_json::to_value(self.kind).unwrap_or(Value::Null),
        ]
    }

    /// Decodes the positional arguments of an `audit` event.
    pub fn from_args(args: &[Value]) -> Option<Self> {
        let [user, operation, kind] = args else {
            return None;
        };
        Some(Self {
            user: user.as_str()?.to_string(),
            operation: operation.as_str()?.to_string(),
            kind: serde_json::from_value(kind.clone()).ok()?,
        })
    }
}
