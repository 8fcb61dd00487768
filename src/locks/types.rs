use serde::{Deserialize, Serialize};

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseOutcome {
    /// The caller held the lock; the next waiter (if any) now holds it.
    Free,
    /// The caller was not the holder. Nothing changed.
    NotPermitted,
}

/// What `acquire` considers success after it installed a holder from the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AcquireMode {
    /// Keep going until this process is the recorded holder.
    #[default]
    Strict,
    /// Return as soon as any dequeued id was installed, even another process's.
    Compatible,
}

pub fn current_key(key: &str) -> String {
    format!("lock_current_{}", key)
}

pub fn queue_key(key: &str) -> String {
    format!("lock_queue_{}", key)
}

pub fn ttl_key(key: &str) -> String {
    format!("lock_current_ttl_{}", key)
}

/// Current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
