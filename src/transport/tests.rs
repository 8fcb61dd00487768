//! Transport Module Tests
//!
//! ## Test Scopes
//! - **Wire format**: message tags, correlation ids and line framing.
//! - **Handler table**: the per-feature install guard and dispatch.
//! - **Routing**: point-to-point sends, coordinator-only broadcast, disconnects.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::BufReader;

    use crate::error::CoordinationError;
    use crate::transport::local::LocalCluster;
    use crate::transport::process::{read_message, write_message};
    use crate::transport::protocol::{Envelope, Message};
    use crate::transport::types::{Process, ProcessId, Role};

    /// Records every envelope delivered to `transport` under a test feature.
    fn record(transport: &crate::transport::Transport) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transport.on_message(
            "recorder",
            Arc::new(move |envelope: &Envelope| sink.lock().unwrap().push(envelope.clone())),
        );
        seen
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    // ============================================================
    // TYPES
    // ============================================================

    #[test]
    fn test_coordinator_owns_id_zero() {
        let process = Process::coordinator();
        assert_eq!(process.id, ProcessId::COORDINATOR);
        assert_eq!(process.role, Role::Coordinator);
        assert!(ProcessId(0).is_coordinator());
        assert!(!ProcessId(3).is_coordinator());
        assert_eq!(ProcessId(7).to_string(), "7");
    }

    // ============================================================
    // WIRE FORMAT
    // ============================================================

    #[test]
    fn test_message_tags_use_wire_names() {
        let set = serde_json::to_value(Message::SetState {
            key: "k".into(),
            value: Some(json!(1)),
        })
        .unwrap();
        assert_eq!(set["type"], "setState");

        let ret = serde_json::to_value(Message::GetStateReturn {
            key: None,
            value: None,
        })
        .unwrap();
        assert_eq!(ret["type"], "getState_return");

        let stats = serde_json::to_value(Message::Stats {
            issued_by: ProcessId(2),
            from_id: ProcessId(0),
        })
        .unwrap();
        assert_eq!(stats, json!({"type": "stats", "issuedBy": 2, "fromId": 0}));
    }

    #[test]
    fn test_uncorrelated_envelope_omits_correlation() {
        let envelope = Envelope {
            from: ProcessId(1),
            correlation: None,
            message: Message::Online,
        };
        let value = serde_json::to_value(&envelope).unwrap();

        assert!(value.get("correlation").is_none());
        assert_eq!(value["message"]["type"], "online");
    }

    #[tokio::test]
    async fn test_line_framing_preserves_envelopes() {
        let (mut writer, server) = tokio::io::duplex(4096);
        let mut reader = BufReader::new(server);

        let first = Envelope {
            from: ProcessId(1),
            correlation: Some(9),
            message: Message::GetState {
                key: Some("a".into()),
            },
        };
        let second = Envelope {
            from: ProcessId(0),
            correlation: None,
            message: Message::Event {
                event: "index:added".into(),
                args: vec![json!(0), json!([])],
            },
        };

        write_message(&mut writer, &first).await.unwrap();
        write_message(&mut writer, &second).await.unwrap();
        drop(writer);

        let read_first: Option<Envelope> = read_message(&mut reader).await.unwrap();
        let read_second: Option<Envelope> = read_message(&mut reader).await.unwrap();
        let eof: Option<Envelope> = read_message(&mut reader).await.unwrap();

        assert_eq!(read_first, Some(first));
        assert_eq!(read_second, Some(second));
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn test_read_message_skips_blank_lines() {
        let input: &[u8] = b"\n\r\n{\"from\":3,\"message\":{\"type\":\"main_stats\"}}\n";
        let mut reader = BufReader::new(input);

        let envelope: Envelope = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(envelope.from, ProcessId(3));
        assert_eq!(envelope.message, Message::MainStats);
    }

    #[tokio::test]
    async fn test_read_message_rejects_garbage() {
        let input: &[u8] = b"not json\n";
        let mut reader = BufReader::new(input);

        let result: std::io::Result<Option<Envelope>> = read_message(&mut reader).await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::InvalidData);
    }

    // ============================================================
    // HANDLER TABLE
    // ============================================================

    #[tokio::test]
    async fn test_feature_handler_installs_once() {
        let cluster = LocalCluster::spawn(1);
        let transport = &cluster.coordinator;

        assert!(transport.on_message("feature", Arc::new(|_: &Envelope| {})));
        assert!(!transport.on_message("feature", Arc::new(|_: &Envelope| {})));
        assert!(transport.has_handler("feature"));
        assert!(!transport.has_handler("other"));
    }

    // ============================================================
    // ROUTING
    // ============================================================

    #[tokio::test]
    async fn test_participant_to_coordinator_delivery() {
        let cluster = LocalCluster::spawn(2);
        let seen = record(&cluster.coordinator);

        let participant = cluster.participant(ProcessId(2)).unwrap();
        participant
            .send_correlated(ProcessId::COORDINATOR, 5, Message::MainStats)
            .unwrap();
        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from, ProcessId(2));
        assert_eq!(seen[0].correlation, Some(5));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_participant() {
        let cluster = LocalCluster::spawn(3);
        let recorders: Vec<_> = cluster.participants.iter().map(|t| record(t)).collect();

        cluster
            .coordinator
            .broadcast(Message::Event {
                event: "ping".into(),
                args: vec![],
            })
            .unwrap();
        settle().await;

        for seen in recorders {
            assert_eq!(seen.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_one_participant() {
        let cluster = LocalCluster::spawn(3);
        let recorders: Vec<_> = cluster.participants.iter().map(|t| record(t)).collect();

        cluster
            .coordinator
            .broadcast_except(Message::MainStats, Some(ProcessId(2)))
            .unwrap();
        settle().await;

        let counts: Vec<usize> = recorders.iter().map(|s| s.lock().unwrap().len()).collect();
        assert_eq!(counts, vec![1, 0, 1]);
    }

    #[tokio::test]
    async fn test_participant_cannot_broadcast() {
        let cluster = LocalCluster::spawn(1);
        let err = cluster.participants[0]
            .broadcast(Message::MainStats)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CoordinationError>(),
            Some(CoordinationError::NotCoordinator)
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_process_fails() {
        let cluster = LocalCluster::spawn(1);
        let err = cluster
            .coordinator
            .send(ProcessId(42), Message::MainStats)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CoordinationError>(),
            Some(CoordinationError::UnknownProcess(ProcessId(42)))
        ));
    }

    #[tokio::test]
    async fn test_disconnected_participant_leaves_broadcast_set() {
        let cluster = LocalCluster::spawn(2);
        assert_eq!(
            cluster.coordinator.participants(),
            vec![ProcessId(1), ProcessId(2)]
        );

        cluster.disconnect(ProcessId(1));

        assert_eq!(cluster.coordinator.participants(), vec![ProcessId(2)]);
        assert!(cluster.participants[0]
            .send(ProcessId::COORDINATOR, Message::Online)
            .is_err());
        cluster.coordinator.broadcast(Message::MainStats).unwrap();
    }

    #[tokio::test]
    async fn test_messages_from_one_sender_keep_order() {
        let cluster = LocalCluster::spawn(1);
        let seen = record(&cluster.coordinator);

        for n in 0..20u64 {
            cluster.participants[0]
                .send_correlated(ProcessId::COORDINATOR, n, Message::MainStats)
                .unwrap();
        }
        settle().await;

        let order: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.correlation)
            .collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }
}
