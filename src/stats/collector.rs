//! Stats Scatter-Gather
//!
//! Request flow when a participant asks:
//! 1. Participant sends `stats { issuedBy: self }` to the coordinator.
//! 2. Coordinator fans `stats` out to every participant.
//! 3. Each participant answers `stats_return`, which the coordinator routes back to the issuer.
//! 4. After the settle window the issuer asks `main_stats` for the coordinator's own snapshot.
//!
//! When the coordinator asks, it inserts its own snapshot and collects `stats_return` directly.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Result;
use sysinfo::System;
use tokio::sync::mpsc;

use super::sample::{format_byte_size, local_snapshot, parse_byte_size};
use super::types::{ProcessStatsTable, StatSnapshot};
use crate::transport::Transport;
use crate::transport::protocol::{Envelope, Message};
use crate::transport::types::ProcessId;

pub const STATS_FEATURE: &str = "stats";

/// Upper bound on the wait for the very first reply of a collection.
pub const FIRST_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

enum StatsReply {
    Process(ProcessId, StatSnapshot),
    Coordinator(StatSnapshot),
}

pub struct StatsAggregator {
    transport: Arc<Transport>,
    system: Mutex<System>,
    settle: Duration,
    first_reply_timeout: Duration,
    inflight: tokio::sync::Mutex<()>,
    sink: Mutex<Option<mpsc::UnboundedSender<StatsReply>>>,
}

impl StatsAggregator {
    pub fn new(transport: Arc<Transport>, settle: Duration) -> Arc<Self> {
        let aggregator = Arc::new(Self {
            transport: transport.clone(),
            system: Mutex::new(System::new()),
            settle,
            first_reply_timeout: FIRST_REPLY_TIMEOUT,
            inflight: tokio::sync::Mutex::new(()),
            sink: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&aggregator);
        transport.on_message(
            STATS_FEATURE,
            Arc::new(move |envelope: &Envelope| {
                if let Some(aggregator) = weak.upgrade() {
                    aggregator.handle_message(envelope);
                }
            }),
        );

        aggregator
    }

    pub fn snapshot(&self) -> StatSnapshot {
        let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        local_snapshot(&mut system)
    }

    fn feed(&self, reply: StatsReply) {
        let sink = self.sink.lock().unwrap_or_else(|p| p.into_inner());
        match sink.as_ref() {
            Some(sender) => {
                let _ = sender.send(reply);
            }
            None => tracing::debug!("Stats reply arrived with no collection in flight"),
        }
    }

    fn handle_message(&self, envelope: &Envelope) {
        let result = if self.transport.is_coordinator() {
            self.handle_as_coordinator(envelope)
        } else {
            self.handle_as_participant(envelope)
        };

        if let Err(e) = result {
            tracing::error!("Failed to handle {}: {}", envelope.message.kind(), e);
        }
    }

    fn handle_as_coordinator(&self, envelope: &Envelope) -> Result<()> {
        match &envelope.message {
            Message::Stats { issued_by, .. } => {
                for id in self.transport.participants() {
                    self.transport.send(
                        id,
                        Message::Stats {
                            issued_by: *issued_by,
                            from_id: id,
                        },
                    )?;
                }
            }
            Message::StatsReturn {
                issued_by,
                from_id,
                stats,
            } => {
                if issued_by.is_coordinator() {
                    self.feed(StatsReply::Process(*from_id, stats.clone()));
                } else {
                    self.transport.send(*issued_by, envelope.message.clone())?;
                }
            }
            Message::MainStats => {
                self.transport.send(
                    envelope.from,
                    Message::MainStatsReturn {
                        stats: self.snapshot(),
                    },
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_as_participant(&self, envelope: &Envelope) -> Result<()> {
        match &envelope.message {
            Message::Stats { issued_by, .. } => {
                self.transport.send(
                    ProcessId::COORDINATOR,
                    Message::StatsReturn {
                        issued_by: *issued_by,
                        from_id: self.transport.id(),
                        stats: self.snapshot(),
                    },
                )?;
            }
            Message::StatsReturn { from_id, stats, .. } => {
                self.feed(StatsReply::Process(*from_id, stats.clone()));
            }
            Message::MainStatsReturn { stats } => {
                self.feed(StatsReply::Coordinator(stats.clone()));
            }
            _ => {}
        }
        Ok(())
    }

    /// Collects a snapshot from every reachable process.
    ///
    /// Collections issued concurrently on one process run one after another.
    pub async fn collect(&self) -> Result<ProcessStatsTable> {
        let _inflight = self.inflight.lock().await;
        let (sender, mut replies) = mpsc::unbounded_channel();
        *self.sink.lock().unwrap_or_else(|p| p.into_inner()) = Some(sender);

        let result = if self.transport.is_coordinator() {
            self.collect_as_coordinator(&mut replies).await
        } else {
            self.collect_as_participant(&mut replies).await
        };

        *self.sink.lock().unwrap_or_else(|p| p.into_inner()) = None;
        result
    }

    async fn collect_as_coordinator(
        &self,
        replies: &mut mpsc::UnboundedReceiver<StatsReply>,
    ) -> Result<ProcessStatsTable> {
        let mut table = ProcessStatsTable::new();
        table.insert(ProcessId::COORDINATOR, self.snapshot());

        let participants = self.transport.participants();
        if participants.is_empty() {
            return Ok(table);
        }

        for id in participants.iter() {
            self.transport.send(
                *id,
                Message::Stats {
                    issued_by: ProcessId::COORDINATOR,
                    from_id: *id,
                },
            )?;
        }

        self.gather(replies, &mut table, Some(participants.len() + 1))
            .await;
        Ok(table)
    }

    async fn collect_as_participant(
        &self,
        replies: &mut mpsc::UnboundedReceiver<StatsReply>,
    ) -> Result<ProcessStatsTable> {
        let me = self.transport.id();
        let mut table = ProcessStatsTable::new();

        self.transport.send(
            ProcessId::COORDINATOR,
            Message::Stats {
                issued_by: me,
                from_id: me,
            },
        )?;
        self.gather(replies, &mut table, None).await;

        self.transport
            .send(ProcessId::COORDINATOR, Message::MainStats)?;
        loop {
            match tokio::time::timeout(self.first_reply_timeout, replies.recv()).await {
                Ok(Some(StatsReply::Coordinator(stats))) => {
                    table.insert(ProcessId::COORDINATOR, stats);
                    break;
                }
                Ok(Some(StatsReply::Process(id, stats))) => {
                    table.insert(id, stats);
                }
                Ok(None) | Err(_) => {
                    tracing::warn!("Coordinator did not answer main_stats");
                    break;
                }
            }
        }

        Ok(table)
    }

    /// Applies the settle window: every reply restarts it. Stops early once
    /// `expected` entries are present.
    async fn gather(
        &self,
        replies: &mut mpsc::UnboundedReceiver<StatsReply>,
        table: &mut ProcessStatsTable,
        expected: Option<usize>,
    ) {
        let mut window = self.first_reply_timeout;
        loop {
            if expected.is_some_and(|expected| table.len() >= expected) {
                break;
            }
            match tokio::time::timeout(window, replies.recv()).await {
                Ok(Some(StatsReply::Process(id, stats))) => {
                    table.insert(id, stats);
                    window = self.settle;
                }
                Ok(Some(StatsReply::Coordinator(stats))) => {
                    table.insert(ProcessId::COORDINATOR, stats);
                }
                Ok(None) | Err(_) => break,
            }
        }
    }
}

/// Logs a per-process table plus memory and CPU totals.
pub fn summarize(table: &ProcessStatsTable) {
    if table.is_empty() {
        tracing::info!("No stats collected");
        return;
    }

    tracing::info!("Stats for all processes");
    tracing::info!("{:<8} | {:<10} | {}", "process", "cpu", "memory");
    for (id, stats) in table.iter() {
        tracing::info!(
            "{:<8} | {:<10} | {}",
            id,
            stats.cpu.used_percentage,
            stats.memory.used
        );
    }

    let total_memory: u64 = table
        .values()
        .filter_map(|stats| parse_byte_size(&stats.memory.used))
        .sum();
    let total_cpu: f64 = table
        .values()
        .filter_map(|stats| stats.cpu.used_percentage.trim_end_matches('%').parse::<f64>().ok())
        .sum();

    tracing::info!("Total memory usage: {}", format_byte_size(total_memory));
    tracing::info!(
        "Average memory usage: {}",
        format_byte_size(total_memory / table.len() as u64)
    );
    tracing::info!("Total CPU usage: {:.2}%", total_cpu);
}
