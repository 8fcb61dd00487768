use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::transport::types::ProcessId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Resident memory, human formatted (e.g. `"12.500 MiB"`).
    pub used: String,
    /// Share of total system memory, e.g. `"0.35%"`.
    pub used_percentage: String,
    pub used_percentage_raw: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    /// CPU usage of the process in percent of one core.
    pub used: f64,
    /// Usage spread over all cores, e.g. `"1.25%"`.
    pub used_percentage: String,
}

/// Memory/CPU snapshot of one process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatSnapshot {
    pub memory: MemoryStats,
    pub cpu: CpuStats,
}

/// Snapshot per process id; the coordinator is always under id 0.
pub type ProcessStatsTable = BTreeMap<ProcessId, StatSnapshot>;
