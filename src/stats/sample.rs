use sysinfo::{Pid, System};

use super::types::{CpuStats, MemoryStats, StatSnapshot};
use crate::config::Config;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Samples memory and CPU of the current process.
///
/// CPU usage needs two refreshes to be meaningful, so a freshly started process
/// reports 0 until its second sample.
pub fn local_snapshot(system: &mut System) -> StatSnapshot {
    let pid = Pid::from(std::process::id() as usize);
    system.refresh_memory();
    system.refresh_process(pid);

    let total = system.total_memory();
    let (memory, cpu) = system
        .process(pid)
        .map(|process| (process.memory(), process.cpu_usage() as f64))
        .unwrap_or((0, 0.0));

    let used_percentage_raw = if total == 0 {
        0.0
    } else {
        memory as f64 / total as f64 * 100.0
    };

    StatSnapshot {
        memory: MemoryStats {
            used: format_byte_size(memory),
            used_percentage: format!("{:.2}%", used_percentage_raw),
            used_percentage_raw,
        },
        cpu: CpuStats {
            used: cpu,
            used_percentage: format!("{:.2}%", cpu / Config::cpu_count() as f64),
        },
    }
}

pub fn format_byte_size(bytes: u64) -> String {
    if bytes < KIB {
        format!("{} bytes", bytes)
    } else if bytes < MIB {
        format!("{:.3} KiB", bytes as f64 / KIB as f64)
    } else if bytes < GIB {
        format!("{:.3} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.3} GiB", bytes as f64 / GIB as f64)
    }
}

/// Inverse of `format_byte_size`. Unknown units yield `None`.
pub fn parse_byte_size(size: &str) -> Option<u64> {
    let (number, unit) = size.split_once(' ')?;
    let number: f64 = number.parse().ok()?;
    let factor = match unit {
        "bytes" => 1,
        "KiB" => KIB,
        "MiB" => MIB,
        "GiB" => GIB,
        _ => return None,
    };
    Some((number * factor as f64).round() as u64)
}
