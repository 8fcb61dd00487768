use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a process in the group. The coordinator always owns id 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub const COORDINATOR: ProcessId = ProcessId(0);

    pub fn is_coordinator(self) -> bool {
        self == Self::COORDINATOR
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Participant,
}

/// A member of the process group.
///
/// Created at group startup and dropped when the process exits; nothing about it is persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Process {
    pub id: ProcessId,
    pub role: Role,
}

impl Process {
    pub fn coordinator() -> Self {
        Self {
            id: ProcessId::COORDINATOR,
            role: Role::Coordinator,
        }
    }

    pub fn participant(id: ProcessId) -> Self {
        Self {
            id,
            role: Role::Participant,
        }
    }
}
