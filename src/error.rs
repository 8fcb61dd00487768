use crate::transport::types::ProcessId;

/// Conditions callers may want to match on. Everything else travels as `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("process {0} is not reachable")]
    UnknownProcess(ProcessId),

    #[error("channel to process {0} is closed")]
    ChannelClosed(ProcessId),

    #[error("only the coordinator can broadcast")]
    NotCoordinator,

    #[error("timed out waiting on state key `{key}`")]
    WaitTimedOut { key: String },

    #[error("request {0} was dropped before the coordinator answered")]
    RequestDropped(u64),
}
