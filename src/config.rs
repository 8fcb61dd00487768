//! Process-group configuration.
//!
//! Every option can be given as a flag or through the environment. The coordinator
//! passes its own configuration down to the workers it spawns via the environment,
//! so both roles always agree on lock timing, index depth and echo policy.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::events::bus::EchoPolicy;
use crate::locks::types::AcquireMode;
use crate::transport::types::ProcessId;

pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_INDEX_DEPTH: usize = 20;
pub const DEFAULT_LOCK_TTL_MS: u64 = 10_000;
pub const DEFAULT_LOCK_POLL_MS: u64 = 100;
pub const DEFAULT_STATS_SETTLE_MS: u64 = 100;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of worker processes to spawn. Defaults to the CPU count.
    #[arg(long, env = "CLUSTER_WORKERS")]
    pub workers: Option<usize>,

    /// Allow more workers than available CPUs.
    #[arg(long, env = "CLUSTER_FORCE_WORKERS")]
    pub force_workers: bool,

    /// How long the coordinator waits for every worker to come online.
    #[arg(long, env = "CLUSTER_STARTUP_TIMEOUT_MS", default_value_t = DEFAULT_STARTUP_TIMEOUT_MS)]
    pub startup_timeout_ms: u64,

    /// Root directory served by the cluster and walked by the file index.
    #[arg(long, env = "STORAGE_PATH", default_value = ".")]
    pub storage_path: PathBuf,

    /// Maximum directory depth of the initial index walk.
    #[arg(long, env = "CLUSTER_INDEX_DEPTH", default_value_t = DEFAULT_INDEX_DEPTH)]
    pub index_depth: usize,

    /// Default lock TTL in milliseconds.
    #[arg(long, env = "CLUSTER_LOCK_TTL_MS", default_value_t = DEFAULT_LOCK_TTL_MS)]
    pub lock_ttl_ms: u64,

    /// Poll interval for lock acquirers that are not queued.
    #[arg(long, env = "CLUSTER_LOCK_POLL_MS", default_value_t = DEFAULT_LOCK_POLL_MS)]
    pub lock_poll_ms: u64,

    /// Return from `acquire` as soon as any queued id was installed as holder.
    #[arg(long, env = "CLUSTER_LOCK_COMPATIBLE")]
    pub lock_compatible: bool,

    /// Do not send a participant's own events back to it.
    #[arg(long, env = "CLUSTER_SUPPRESS_EVENT_ECHO")]
    pub suppress_event_echo: bool,

    /// Settle window of the stats scatter-gather.
    #[arg(long, env = "CLUSTER_STATS_SETTLE_MS", default_value_t = DEFAULT_STATS_SETTLE_MS)]
    pub stats_settle_ms: u64,

    /// Log the cluster stats table every N seconds (0 disables).
    #[arg(long, env = "CLUSTER_STATS_INTERVAL_SECS", default_value_t = 0)]
    pub stats_interval_secs: u64,

    /// Fallback log filter when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Set by the coordinator on the workers it spawns.
    #[arg(long, env = "CLUSTER_WORKER_ID", hide = true)]
    pub worker_id: Option<u32>,
}

impl Config {
    pub fn worker_id(&self) -> Option<ProcessId> {
        self.worker_id.map(ProcessId)
    }

    pub fn cpu_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Requested worker count, capped to the CPU count unless forced.
    pub fn effective_workers(&self) -> usize {
        let cpus = Self::cpu_count();
        let requested = self.workers.unwrap_or(cpus);
        if requested > cpus && !self.force_workers {
            tracing::warn!(
                "Cannot create {} workers, only {} CPUs available",
                requested,
                cpus
            );
            return cpus;
        }
        requested
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    pub fn acquire_mode(&self) -> AcquireMode {
        if self.lock_compatible {
            AcquireMode::Compatible
        } else {
            AcquireMode::Strict
        }
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        if self.suppress_event_echo {
            EchoPolicy::SuppressOrigin
        } else {
            EchoPolicy::Echo
        }
    }

    pub fn stats_settle(&self) -> Duration {
        Duration::from_millis(self.stats_settle_ms)
    }

    /// Environment handed to spawned workers so they share this configuration.
    pub fn worker_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("STORAGE_PATH", self.storage_path.display().to_string()),
            ("CLUSTER_INDEX_DEPTH", self.index_depth.to_string()),
            ("CLUSTER_LOCK_TTL_MS", self.lock_ttl_ms.to_string()),
            ("CLUSTER_LOCK_POLL_MS", self.lock_poll_ms.to_string()),
            ("CLUSTER_STATS_SETTLE_MS", self.stats_settle_ms.to_string()),
            ("LOG_LEVEL", self.log_level.clone()),
        ];
        if self.lock_compatible {
            env.push(("CLUSTER_LOCK_COMPATIBLE", "true".to_string()));
        }
        if self.suppress_event_echo {
            env.push(("CLUSTER_SUPPRESS_EVENT_ECHO", "true".to_string()));
        }
        env
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: None,
            force_workers: false,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            storage_path: PathBuf::from("."),
            index_depth: DEFAULT_INDEX_DEPTH,
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            lock_poll_ms: DEFAULT_LOCK_POLL_MS,
            lock_compatible: false,
            suppress_event_echo: false,
            stats_settle_ms: DEFAULT_STATS_SETTLE_MS,
            stats_interval_secs: 0,
            log_level: "info".to_string(),
            worker_id: None,
        }
    }
}
