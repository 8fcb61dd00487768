use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

/// One applied write, as observed by watchers on every process.
///
/// `value: None` means the key was deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateMutation {
    pub key: String,
    pub value: Option<Value>,
    pub old: Option<Value>,
}

/// Keeps a `watch` subscription alive until `unwatch` is called.
pub struct WatchHandle {
    pub(crate) task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn unwatch(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Callback of a `watch`: `(new value, old value)`.
pub type WatchCallback = Box<dyn Fn(Option<Value>, Option<Value>) + Send + Sync>;
