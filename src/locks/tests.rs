//! Lock Manager Tests
//!
//! Runs the lock algorithm across an in-memory process group.
//!
//! ## Test Scopes
//! - **Single process**: acquire, release, renewal and refused release.
//! - **Contention**: mutual exclusion and FIFO hand-off between participants.
//! - **Recovery**: TTL expiry of abandoned and crashed holders.
//! - **Modes**: strict versus compatible completion.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use crate::locks::types::{current_key, now_ms, queue_key, ttl_key};
    use crate::locks::{AcquireMode, LockManager, ReleaseOutcome};
    use crate::state::{StateStore, state_store};
    use crate::transport::local::LocalCluster;
    use crate::transport::types::ProcessId;

    const POLL: Duration = Duration::from_millis(10);
    const LONG_TTL: Duration = Duration::from_secs(10);
    const DEADLINE: Duration = Duration::from_secs(5);

    /// Index 0 is the coordinator's manager, then participants 1..=n.
    struct Harness {
        _cluster: LocalCluster,
        states: Vec<Arc<dyn StateStore>>,
        managers: Vec<Arc<LockManager>>,
    }

    fn harness(participants: u32, ttl: Duration, mode: AcquireMode) -> Harness {
        let cluster = LocalCluster::spawn(participants);
        let mut states = Vec::new();
        let mut managers = Vec::new();
        for transport in cluster.all() {
            let state = state_store(transport.clone());
            managers.push(LockManager::new(state.clone(), transport.id(), ttl, POLL, mode));
            states.push(state);
        }
        Harness {
            _cluster: cluster,
            states,
            managers,
        }
    }

    async fn wait_for_queue(manager: &LockManager, key: &str, expected: &[ProcessId]) {
        tokio::time::timeout(DEADLINE, async {
            while manager.queue(key).await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue never reached the expected shape");
    }

    // ============================================================
    // SINGLE PROCESS
    // ============================================================

    #[tokio::test]
    async fn test_acquire_then_release_frees_lock() {
        let h = harness(0, LONG_TTL, AcquireMode::Strict);
        let manager = &h.managers[0];

        manager.acquire("k").await.unwrap();
        assert_eq!(manager.holder("k").await.unwrap(), Some(ProcessId(0)));
        assert!(manager.queue("k").await.unwrap().is_empty());

        let outcome = manager.release("k").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Free);
        assert_eq!(manager.holder("k").await.unwrap(), None);
        assert!(manager.queue("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_without_holding_is_not_permitted() {
        let h = harness(1, LONG_TTL, AcquireMode::Strict);

        h.managers[1].acquire("k").await.unwrap();
        let outcome = h.managers[0].release("k").await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::NotPermitted);
        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(1)));
    }

    #[tokio::test]
    async fn test_release_of_unknown_key_is_not_permitted() {
        let h = harness(0, LONG_TTL, AcquireMode::Strict);
        assert_eq!(
            h.managers[0].release("never").await.unwrap(),
            ReleaseOutcome::NotPermitted
        );
    }

    #[tokio::test]
    async fn test_reacquire_renews_ttl() {
        let h = harness(1, LONG_TTL, AcquireMode::Strict);
        let manager = &h.managers[1];

        manager.acquire("k").await.unwrap();
        let first = h.states[1].get(&ttl_key("k")).await.unwrap().unwrap().as_u64().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.acquire("k").await.unwrap();
        let second = h.states[1].get(&ttl_key("k")).await.unwrap().unwrap().as_u64().unwrap();

        assert!(second > first, "TTL should be pushed back on re-acquire");
        assert_eq!(manager.holder("k").await.unwrap(), Some(ProcessId(1)));
        assert!(manager.queue("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_queue_reads_as_empty() {
        let h = harness(0, LONG_TTL, AcquireMode::Strict);
        h.states[0]
            .set(&queue_key("k"), Some(json!("garbage")))
            .await
            .unwrap();

        assert!(h.managers[0].queue("k").await.unwrap().is_empty());
        h.managers[0].acquire("k").await.unwrap();
        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(0)));
    }

    // ============================================================
    // CONTENTION
    // ============================================================

    #[tokio::test]
    async fn test_mutual_exclusion_across_participants() {
        let h = harness(3, LONG_TTL, AcquireMode::Strict);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for manager in h.managers[1..].iter().cloned() {
            let active = active.clone();
            let peak = peak.clone();
            let completed = completed.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..4 {
                    manager
                        .with_lock("shared", None, async {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            completed.fetch_add(1, Ordering::SeqCst);
                        })
                        .await
                        .unwrap();
                }
            }));
        }

        tokio::time::timeout(Duration::from_secs(20), async {
            for task in tasks {
                task.await.unwrap();
            }
        })
        .await
        .expect("contended lock never drained");

        assert_eq!(peak.load(Ordering::SeqCst), 1, "two holders at once");
        assert_eq!(completed.load(Ordering::SeqCst), 12);
        assert_eq!(h.managers[0].holder("shared").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_fifo_order() {
        let h = harness(3, LONG_TTL, AcquireMode::Strict);
        let order = Arc::new(Mutex::new(Vec::new()));

        // ARRANGE: participant 1 holds, then 2 and 3 queue up in that order
        h.managers[1].acquire("k").await.unwrap();

        let spawn_waiter = |index: usize| {
            let manager = h.managers[index].clone();
            let order = order.clone();
            tokio::spawn(async move {
                manager.acquire("k").await.unwrap();
                order.lock().unwrap().push(manager.id());
                manager.release("k").await.unwrap();
            })
        };

        let second = spawn_waiter(2);
        wait_for_queue(&h.managers[0], "k", &[ProcessId(2)]).await;
        let third = spawn_waiter(3);
        wait_for_queue(&h.managers[0], "k", &[ProcessId(2), ProcessId(3)]).await;

        // ACT
        assert_eq!(h.managers[1].release("k").await.unwrap(), ReleaseOutcome::Free);
        tokio::time::timeout(DEADLINE, async {
            second.await.unwrap();
            third.await.unwrap();
        })
        .await
        .unwrap();

        // ASSERT
        assert_eq!(*order.lock().unwrap(), vec![ProcessId(2), ProcessId(3)]);
        assert_eq!(h.managers[0].holder("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_release_hands_lock_to_next_waiter() {
        let h = harness(2, LONG_TTL, AcquireMode::Strict);
        h.managers[1].acquire("k").await.unwrap();

        let waiter = {
            let manager = h.managers[2].clone();
            tokio::spawn(async move { manager.acquire("k").await })
        };
        wait_for_queue(&h.managers[0], "k", &[ProcessId(2)]).await;

        h.managers[1].release("k").await.unwrap();
        tokio::time::timeout(DEADLINE, waiter).await.unwrap().unwrap().unwrap();

        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(2)));
        assert!(h.managers[0].queue("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_racing_initializers_run_once_each_in_turn() {
        let h = harness(2, LONG_TTL, AcquireMode::Strict);
        let initialized = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for (manager, state) in h.managers[1..].iter().zip(h.states[1..].iter()) {
            let manager = manager.clone();
            let state = state.clone();
            let initialized = initialized.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .with_lock("init", None, async {
                        if !state.has("initialized").await.unwrap() {
                            initialized.fetch_add(1, Ordering::SeqCst);
                            state.set("initialized", Some(json!(true))).await.unwrap();
                        }
                    })
                    .await
                    .unwrap();
            }));
        }

        tokio::time::timeout(DEADLINE, async {
            for task in tasks {
                task.await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(initialized.load(Ordering::SeqCst), 1);
        assert_eq!(h.managers[0].holder("init").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_install_loses_to_concurrent_holder_change() {
        let h = harness(2, LONG_TTL, AcquireMode::Strict);

        // Participant 1 wins; a write expecting the lock to still be free must fail.
        h.managers[1].acquire("k").await.unwrap();
        let swapped = h.states[2]
            .compare_and_set(&current_key("k"), None, Some(json!(2)))
            .await
            .unwrap();

        assert!(!swapped);
        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(1)));
    }

    #[tokio::test]
    async fn test_losing_install_leaves_winner_lease_untouched() {
        let h = harness(2, LONG_TTL, AcquireMode::Strict);

        // ARRANGE: participant 1 holds with a long lease
        h.managers[1].acquire_with_ttl("k", LONG_TTL).await.unwrap();
        let lease = h.states[0].get(&ttl_key("k")).await.unwrap();

        // ACT: participant 2 acts on a stale "free" read with a short TTL
        let claimed = h.managers[2]
            .install("k", None, Some(ProcessId(2)), Duration::from_millis(50))
            .await
            .unwrap();

        // ASSERT: the lease survives and nobody else gets in after the short TTL
        assert!(!claimed);
        assert_eq!(h.states[0].get(&ttl_key("k")).await.unwrap(), lease);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let contender =
            tokio::time::timeout(Duration::from_millis(300), h.managers[0].acquire("k")).await;
        assert!(contender.is_err());
        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(1)));
    }

    #[tokio::test]
    async fn test_grant_over_lapsed_ttl_is_never_read_as_expired() {
        let h = harness(1, LONG_TTL, AcquireMode::Strict);
        h.states[0]
            .set(&ttl_key("k"), Some(json!(now_ms() - 1)))
            .await
            .unwrap();

        let claimed = h.managers[1]
            .install("k", None, Some(ProcessId(1)), LONG_TTL)
            .await
            .unwrap();

        assert!(claimed);
        let expires = h.states[0].get(&ttl_key("k")).await.unwrap().unwrap();
        assert!(expires.as_u64().unwrap() > now_ms());
    }

    // ============================================================
    // RECOVERY
    // ============================================================

    #[tokio::test]
    async fn test_holder_timer_frees_lock_after_ttl() {
        let h = harness(1, LONG_TTL, AcquireMode::Strict);

        h.managers[1]
            .acquire_with_ttl("k", Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(h.managers[0].holder("k").await.unwrap(), None);
        assert_eq!(
            h.managers[1].release("k").await.unwrap(),
            ReleaseOutcome::NotPermitted
        );
    }

    #[tokio::test]
    async fn test_crashed_holder_is_recovered_by_expiry() {
        let h = harness(2, LONG_TTL, AcquireMode::Strict);

        // Holder 1 stops running timers, as if its process died.
        h.managers[1]
            .acquire_with_ttl("k", Duration::from_millis(150))
            .await
            .unwrap();
        h.managers[1].shutdown();

        let started = now_ms();
        tokio::time::timeout(DEADLINE, h.managers[2].acquire("k"))
            .await
            .expect("waiter never recovered the lock")
            .unwrap();

        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(2)));
        assert!(now_ms() - started >= 100);
    }

    #[tokio::test]
    async fn test_strict_acquire_waits_out_abandoned_grant() {
        let h = harness(3, Duration::from_millis(150), AcquireMode::Strict);

        // ARRANGE: an expired holder 9 with participant 2 left at the front of the queue
        let state = &h.states[0];
        state.set(&current_key("k"), Some(json!(9))).await.unwrap();
        state.set(&ttl_key("k"), Some(json!(now_ms() - 1))).await.unwrap();
        state.set(&queue_key("k"), Some(json!([2]))).await.unwrap();

        // ACT
        tokio::time::timeout(DEADLINE, h.managers[3].acquire("k"))
            .await
            .unwrap()
            .unwrap();

        // ASSERT: 2 was granted first, never claimed it, and lost it to expiry
        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(3)));
    }

    // ============================================================
    // MODES
    // ============================================================

    #[tokio::test]
    async fn test_compatible_acquire_returns_after_installing_any_waiter() {
        let h = harness(3, LONG_TTL, AcquireMode::Compatible);

        let state = &h.states[0];
        state.set(&current_key("k"), Some(json!(9))).await.unwrap();
        state.set(&ttl_key("k"), Some(json!(now_ms() - 1))).await.unwrap();
        state.set(&queue_key("k"), Some(json!([2]))).await.unwrap();

        tokio::time::timeout(DEADLINE, h.managers[3].acquire("k"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.managers[0].holder("k").await.unwrap(), Some(ProcessId(2)));
        assert_eq!(h.managers[0].queue("k").await.unwrap(), vec![ProcessId(3)]);
    }

    #[test]
    fn test_default_mode_is_strict() {
        assert_eq!(AcquireMode::default(), AcquireMode::Strict);
    }

    #[test]
    fn test_release_outcome_wire_names() {
        assert_eq!(serde_json::to_value(ReleaseOutcome::Free).unwrap(), json!("free"));
        assert_eq!(
            serde_json::to_value(ReleaseOutcome::NotPermitted).unwrap(),
            json!("notPermitted")
        );
    }
}
