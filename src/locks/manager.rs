//! Lock Acquisition and Release
//!
//! The same algorithm runs on every process, parameterized only by the caller's id; the
//! role-specific part is hidden behind the `StateStore` it is given.
//!
//! ## Acquire loop
//! 1. Enqueue self unless already queued or holding.
//! 2. Read holder and expiry.
//! 3. Vacant or expired: install the front of the queue with a fresh TTL.
//! 4. Caller already holds: renew the TTL.
//! 5. Caller is queued: wait until it is installed as holder, bounded by the holder's TTL.
//! 6. Otherwise: sleep one poll interval.
//!
//! Holder changes and queue edits are compare-and-set writes against the value that was
//! read, so two processes acting on the same stale read can not both succeed.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::types::{AcquireMode, ReleaseOutcome, current_key, now_ms, queue_key, ttl_key};
use crate::error::CoordinationError;
use crate::state::StateStore;
use crate::transport::types::ProcessId;

pub struct LockManager {
    state: Arc<dyn StateStore>,
    holder: ProcessId,
    default_ttl: Duration,
    poll_interval: Duration,
    mode: AcquireMode,
    /// Local TTL timers, one per lock key held by this process.
    expiry_timers: DashMap<String, JoinHandle<()>>,
}

impl LockManager {
    pub fn new(
        state: Arc<dyn StateStore>,
        holder: ProcessId,
        default_ttl: Duration,
        poll_interval: Duration,
        mode: AcquireMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            holder,
            default_ttl,
            poll_interval,
            mode,
            expiry_timers: DashMap::new(),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.holder
    }

    pub fn mode(&self) -> AcquireMode {
        self.mode
    }

    /// The recorded holder of `key`, if any.
    pub async fn holder(&self, key: &str) -> Result<Option<ProcessId>> {
        Ok(parse_holder(self.state.get(&current_key(key)).await?.as_ref()))
    }

    /// Ids waiting for `key`, front first. A malformed queue reads as empty.
    pub async fn queue(&self, key: &str) -> Result<Vec<ProcessId>> {
        Ok(parse_queue(self.state.get(&queue_key(key)).await?.as_ref()))
    }

    async fn expiry(&self, key: &str) -> Result<Option<u64>> {
        Ok(self
            .state
            .get(&ttl_key(key))
            .await?
            .and_then(|value| value.as_u64()))
    }

    async fn write_expiry(&self, key: &str, ttl: Duration) -> Result<()> {
        let expires = now_ms() + ttl.as_millis() as u64;
        self.state.set(&ttl_key(key), Some(Value::from(expires))).await
    }

    /// Moves an expiry that already passed to `now + ttl`. Live expiries are left alone.
    async fn refresh_lapsed_expiry(&self, key: &str, ttl: Duration) -> Result<()> {
        let raw = self.state.get(&ttl_key(key)).await?;
        let lapsed = raw
            .as_ref()
            .and_then(|value| value.as_u64())
            .is_none_or(|expires| expires < now_ms());
        if !lapsed {
            return Ok(());
        }

        let expires = now_ms() + ttl.as_millis() as u64;
        self.state
            .compare_and_set(&ttl_key(key), raw, Some(Value::from(expires)))
            .await?;
        Ok(())
    }

    /// Applies `edit` to the queue of `key` and writes it back, retrying on conflicting writes.
    ///
    /// `edit` returns whether it changed the queue; unchanged queues are not written.
    async fn update_queue<F>(&self, key: &str, edit: F) -> Result<Vec<ProcessId>>
    where
        F: Fn(&mut Vec<ProcessId>) -> bool,
    {
        loop {
            let raw = self.state.get(&queue_key(key)).await?;
            let mut queue = parse_queue(raw.as_ref());
            if !edit(&mut queue) {
                return Ok(queue);
            }

            let updated = Some(serde_json::to_value(&queue)?);
            if self
                .state
                .compare_and_set(&queue_key(key), raw, updated)
                .await?
            {
                return Ok(queue);
            }
            tracing::trace!("Queue of lock '{}' changed underneath, retrying", key);
        }
    }

    async fn push_to_queue(&self, key: &str) -> Result<Vec<ProcessId>> {
        let me = self.holder;
        let current = self.holder(key).await?;

        self.update_queue(key, |queue| {
            if queue.contains(&me) || current == Some(me) {
                return false;
            }
            queue.push(me);
            true
        })
        .await
    }

    async fn drop_from_queue(&self, key: &str, ids: &[ProcessId]) -> Result<()> {
        self.update_queue(key, |queue| {
            let before = queue.len();
            queue.retain(|id| !ids.contains(id));
            queue.len() != before
        })
        .await?;
        Ok(())
    }

    /// Replaces the holder `observed` with `next`. Fails if the holder changed since it was read.
    ///
    /// The new TTL is only written once the holder write succeeded, so a losing install
    /// never touches the lease of whoever won. A lapsed expiry is refreshed up front, so
    /// other processes do not read the fresh grant as expired before its TTL lands.
    pub(super) async fn install(
        &self,
        key: &str,
        observed: Option<ProcessId>,
        next: Option<ProcessId>,
        ttl: Duration,
    ) -> Result<bool> {
        if next.is_some() {
            self.refresh_lapsed_expiry(key, ttl).await?;
        }

        let claimed = self
            .state
            .compare_and_set(&current_key(key), holder_value(observed), holder_value(next))
            .await?;
        if !claimed {
            return Ok(false);
        }
        if next.is_some() {
            self.write_expiry(key, ttl).await?;
        }

        let mut served: Vec<ProcessId> = next.into_iter().collect();
        served.extend(observed);
        self.drop_from_queue(key, &served).await?;

        tracing::debug!("Lock '{}' passed from {:?} to {:?}", key, observed, next);
        Ok(true)
    }

    /// Hands the lock from `outgoing` to the next waiter, or clears it when nobody waits.
    async fn advance(&self, key: &str, outgoing: ProcessId) -> Result<bool> {
        let queue = self.queue(key).await?;
        let next = queue.into_iter().find(|id| *id != outgoing);
        self.install(key, Some(outgoing), next, self.default_ttl)
            .await
    }

    pub async fn acquire(self: &Arc<Self>, key: &str) -> Result<()> {
        self.acquire_with_ttl(key, self.default_ttl).await
    }

    /// Blocks until this process holds `key`.
    ///
    /// Retries indefinitely; there is no attempt ceiling or backoff growth.
    pub async fn acquire_with_ttl(self: &Arc<Self>, key: &str, ttl: Duration) -> Result<()> {
        let me = self.holder;

        loop {
            let queue = self.push_to_queue(key).await?;
            let current = self.holder(key).await?;
            let expires = self.expiry(key).await?;
            let now = now_ms();

            if current.is_none() || expires.is_none_or(|expires| expires < now) {
                if let Some(stale) = current {
                    tracing::warn!("Lock '{}' held by {} expired", key, stale);
                }

                let next = queue.first().copied();
                if !self.install(key, current, next, ttl).await? {
                    continue;
                }
                if next == Some(me) || self.mode == AcquireMode::Compatible {
                    self.schedule_expiry(key);
                    tracing::debug!("Process {} acquired lock '{}'", me, key);
                    return Ok(());
                }
                continue;
            }

            if current == Some(me) {
                self.write_expiry(key, ttl).await?;
                self.schedule_expiry(key);
                tracing::debug!("Process {} holds lock '{}'", me, key);
                return Ok(());
            }

            if queue.contains(&me) {
                let remaining = expires.unwrap_or(now).saturating_sub(now);
                let budget = Duration::from_millis(remaining) + self.poll_interval;
                let woken = self
                    .state
                    .wait_until_value(&current_key(key), holder_value(Some(me)), Some(budget))
                    .await;
                match woken {
                    Ok(()) => {}
                    Err(e) if is_wait_timeout(&e) => {
                        tracing::trace!("Process {} re-checking lock '{}'", me, key);
                    }
                    Err(e) => return Err(e),
                }
                continue;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Releases `key` if this process holds it.
    pub async fn release(&self, key: &str) -> Result<ReleaseOutcome> {
        if let Some((_, timer)) = self.expiry_timers.remove(key) {
            timer.abort();
        }

        if self.holder(key).await? != Some(self.holder) {
            return Ok(ReleaseOutcome::NotPermitted);
        }

        if !self.advance(key, self.holder).await? {
            tracing::warn!("Lock '{}' was taken over before {} released it", key, self.holder);
            return Ok(ReleaseOutcome::NotPermitted);
        }

        tracing::debug!("Process {} released lock '{}'", self.holder, key);
        Ok(ReleaseOutcome::Free)
    }

    /// Runs `work` while holding `key`.
    pub async fn with_lock<F, T>(
        self: &Arc<Self>,
        key: &str,
        ttl: Option<Duration>,
        work: F,
    ) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.acquire_with_ttl(key, ttl.unwrap_or(self.default_ttl))
            .await?;
        let output = work.await;
        if self.release(key).await? == ReleaseOutcome::NotPermitted {
            tracing::warn!("Lock '{}' expired before the guarded work finished", key);
        }
        Ok(output)
    }

    /// Starts (or restarts) the timer that frees `key` once this holder's TTL elapses.
    ///
    /// The timer re-reads the expiry on wake, so renewals push it back. It only advances
    /// the queue while this process is still the holder.
    fn schedule_expiry(self: &Arc<Self>, key: &str) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let lock_key = key.to_string();

        let task = tokio::spawn(async move {
            loop {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                let expires = match manager.expiry(&lock_key).await {
                    Ok(Some(expires)) => expires,
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!("Expiry timer for '{}' stopped: {}", lock_key, e);
                        return;
                    }
                };

                let now = now_ms();
                if expires >= now {
                    drop(manager);
                    tokio::time::sleep(Duration::from_millis(expires - now + 1)).await;
                    continue;
                }

                match manager.holder(&lock_key).await {
                    Ok(Some(holder)) if holder == manager.holder => {
                        tracing::warn!(
                            "Lock '{}' TTL elapsed while held by {}, advancing queue",
                            lock_key,
                            holder
                        );
                        if let Err(e) = manager.advance(&lock_key, holder).await {
                            tracing::warn!("Failed to advance lock '{}': {}", lock_key, e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Expiry timer for '{}' stopped: {}", lock_key, e),
                }
                return;
            }
        });

        if let Some(previous) = self.expiry_timers.insert(key.to_string(), task) {
            previous.abort();
        }
    }

    /// Cancels every local TTL timer.
    pub fn shutdown(&self) {
        for entry in self.expiry_timers.iter() {
            entry.value().abort();
        }
        self.expiry_timers.clear();
    }
}

fn holder_value(holder: Option<ProcessId>) -> Option<Value> {
    holder.map(|id| Value::from(id.0))
}

fn parse_holder(raw: Option<&Value>) -> Option<ProcessId> {
    raw.and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn parse_queue(raw: Option<&Value>) -> Vec<ProcessId> {
    raw.and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

fn is_wait_timeout(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<CoordinationError>(),
        Some(CoordinationError::WaitTimedOut { .. })
    )
}
