//! Integration Tests for the 2PC Coordinator
//!
//! A coordinator and two participants wired through the in-process transport,
//! with faults injected per node and per method.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use rust_decimal::Decimal;

    use crate::cluster::{ClusterConfig, NodeEntry};
    use crate::coordinator::{BalanceChange, Coordinator, TxOutcome};
    use crate::event_log::{EventLog, LogPhase, MemoryEventLog};
    use crate::ledger::MemoryLedger;
    use crate::participant::{Participant, ParticipantOptions};
    use crate::rpc::{Fault, LoopbackTransport, RpcHandler, RpcRequest};
    use crate::supervisor::TimeoutSweep;

    const TX_TIMEOUT: Duration = Duration::from_secs(3);

    fn node(server_id: &str, port: u16, account: Option<&str>) -> NodeEntry {
        NodeEntry {
            server_id: server_id.into(),
            ip: "127.0.0.1".into(),
            port,
            account_id: account.map(str::to_string),
        }
    }

    struct TestHarness {
        coordinator: Arc<Coordinator>,
        coordinator_log: Arc<MemoryEventLog>,
        a: Arc<Participant>,
        b: Arc<Participant>,
        transport: Arc<LoopbackTransport>,
    }

    impl TestHarness {
        fn new(a_balance: i64, b_balance: i64) -> Self {
            let cluster = ClusterConfig {
                coordinator: "coordinator".into(),
                nodes: vec![
                    node("coordinator", 8000, None),
                    node("A", 8001, Some("A")),
                    node("B", 8002, Some("B")),
                ],
            };
            cluster.validate().unwrap();

            let transport = Arc::new(LoopbackTransport::new(Duration::from_millis(200)));
            let coordinator_log = Arc::new(MemoryEventLog::new());
            let coordinator = Arc::new(
                Coordinator::new(
                    "coordinator",
                    cluster.address_book_for("coordinator"),
                    transport.clone(),
                    coordinator_log.clone(),
                    TX_TIMEOUT,
                )
                .unwrap(),
            );

            let participant = |account: &str, balance: i64| {
                Arc::new(
                    Participant::new(
                        account,
                        Arc::new(MemoryLedger::with_account(account, Decimal::from(balance))),
                        Arc::new(MemoryEventLog::new()),
                        transport.clone(),
                        cluster.address_book_for(account),
                        Decimal::ZERO,
                        ParticipantOptions::default(),
                    )
                    .unwrap(),
                )
            };
            let a = participant("A", a_balance);
            let b = participant("B", b_balance);

            transport.register("coordinator", coordinator.clone());
            transport.register("A", a.clone());
            transport.register("B", b.clone());

            Self {
                coordinator,
                coordinator_log,
                a,
                b,
                transport,
            }
        }

        fn balances(&self) -> (Decimal, Decimal) {
            (self.a.get_balance().unwrap(), self.b.get_balance().unwrap())
        }

        fn phases(&self) -> Vec<(LogPhase, String)> {
            self.coordinator_log
                .records()
                .unwrap()
                .into_iter()
                .map(|r| (r.phase, r.account_id))
                .collect()
        }
    }

    // ========================================================================
    // Happy Path
    // ========================================================================

    #[tokio::test]
    async fn test_transfer_commits_and_conserves() {
        let h = TestHarness::new(500, 300);

        let msg = h.coordinator.transfer("A", "B", Decimal::from(100)).await;
        assert_eq!(msg, "Transferred 100 from A to B. New Balances: A: 400, B: 400");
        assert_eq!(h.balances(), (Decimal::from(400), Decimal::from(400)));
        assert!(h.coordinator.table().is_empty());
        assert_eq!(h.a.pending_count(), 0);
        assert_eq!(h.b.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_transfer_through_rpc_handler() {
        let h = TestHarness::new(500, 300);

        let result = h
            .coordinator
            .handle(RpcRequest::Transfer {
                account_id_from: "B".into(),
                account_id_to: "A".into(),
                amount: Decimal::new(255, 1),
            })
            .await
            .unwrap();
        assert_eq!(
            result.as_str().unwrap(),
            "Transferred 25.5 from B to A. New Balances: A: 525.5, B: 274.5"
        );
    }

    #[tokio::test]
    async fn test_add_bonus_uses_first_account() {
        let h = TestHarness::new(1000, 500);

        let msg = h.coordinator.add_bonus(Decimal::new(1, 1)).await;
        assert_eq!(
            msg,
            "Added bonus 100 to both accounts. New Balances: A: 1100, B: 600"
        );
        assert_eq!(h.balances(), (Decimal::from(1100), Decimal::from(600)));
    }

    #[tokio::test]
    async fn test_log_written_before_each_rpc() {
        let h = TestHarness::new(500, 300);
        h.coordinator.transfer("A", "B", Decimal::from(100)).await;

        assert_eq!(
            h.phases(),
            vec![
                (LogPhase::Prepare, "A".to_string()),
                (LogPhase::Prepare, "B".to_string()),
                (LogPhase::Commit, "A".to_string()),
                (LogPhase::Commit, "B".to_string()),
            ]
        );
        let records = h.coordinator_log.records().unwrap();
        assert!(records.iter().all(|r| r.transaction_id == Some(1)));
    }

    // ========================================================================
    // Refusals
    // ========================================================================

    #[tokio::test]
    async fn test_rejected_vote_leaves_balances_unchanged() {
        let h = TestHarness::new(100, 300);

        let msg = h.coordinator.transfer("A", "B", Decimal::from(200)).await;
        assert_eq!(msg, "Failed to transfer. Transaction aborted.");
        assert_eq!(h.balances(), (Decimal::from(100), Decimal::from(300)));
        // B voted yes and must have been told to abort
        assert_eq!(h.b.pending_count(), 0);
        assert_eq!(h.transport.call_count("B", "handle_abort"), 1);
        assert_eq!(h.transport.call_count("A", "handle_commit"), 0);

        let aborts: Vec<_> = h
            .coordinator_log
            .records()
            .unwrap()
            .into_iter()
            .filter(|r| r.phase == LogPhase::Abort)
            .collect();
        assert_eq!(aborts.len(), 2);
        assert_eq!(aborts[0].balance, Decimal::from(100));
        assert_eq!(aborts[1].balance, Decimal::from(300));
    }

    #[tokio::test]
    async fn test_prepare_timeout_counts_as_no() {
        let h = TestHarness::new(500, 300);
        h.transport.fail_method("B", "handle_prepare", Fault::Timeout);

        let msg = h.coordinator.transfer("A", "B", Decimal::from(100)).await;
        assert_eq!(msg, "Failed to transfer because of timeout");
        assert_eq!(h.balances(), (Decimal::from(500), Decimal::from(300)));
        assert_eq!(h.a.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_participant_counts_as_no() {
        let h = TestHarness::new(500, 300);
        h.transport.fail_method("A", "handle_prepare", Fault::Unreachable);

        let msg = h.coordinator.transfer("A", "B", Decimal::from(100)).await;
        assert_eq!(msg, "Failed to transfer. Transaction aborted.");
        assert_eq!(h.balances(), (Decimal::from(500), Decimal::from(300)));
        // B is still contacted, then aborted
        assert_eq!(h.transport.call_count("B", "handle_prepare"), 1);
        assert_eq!(h.b.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_balance_read_timeout_opens_nothing() {
        let h = TestHarness::new(500, 300);
        h.transport.fail_method("A", "get_balance", Fault::Timeout);

        let msg = h.coordinator.transfer("A", "B", Decimal::from(100)).await;
        assert_eq!(msg, "Failed to transfer because of timeout");
        assert!(h.coordinator_log.is_empty());
    }

    #[tokio::test]
    async fn test_negative_bonus_rejected_without_logs() {
        let h = TestHarness::new(1000, 500);

        let msg = h.coordinator.add_bonus(Decimal::new(-1, 1)).await;
        assert_eq!(
            msg,
            "Failed to add bonus due to invalid bonus. Transaction aborted."
        );
        assert!(h.coordinator_log.is_empty());
        assert_eq!(h.transport.call_count("A", "get_balance"), 0);
    }

    #[tokio::test]
    async fn test_invalid_transfers_are_reported() {
        let h = TestHarness::new(500, 300);

        let msg = h.coordinator.transfer("A", "B", Decimal::ZERO).await;
        assert_eq!(
            msg,
            "Transfer failed: Invalid amount: transfer amount must be positive, got 0"
        );
        let msg = h.coordinator.transfer("A", "A", Decimal::ONE).await;
        assert_eq!(
            msg,
            "Transfer failed: Invalid request: source and destination accounts must differ"
        );
        let msg = h.coordinator.transfer("A", "Z", Decimal::ONE).await;
        assert_eq!(msg, "Transfer failed: Account not found: Z");

        assert!(h.coordinator_log.is_empty());
        assert_eq!(h.transport.call_count("A", "get_balance"), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_transfer_opens_nothing() {
        let h = TestHarness::new(500, 300);

        let msg = h.coordinator.transfer("A", "B", Decimal::MAX).await;
        assert!(msg.starts_with("Transfer failed: Invalid amount:"), "{}", msg);
        assert!(msg.contains("out of range"), "{}", msg);
        assert!(h.coordinator_log.is_empty());
        assert!(h.coordinator.table().is_empty());
        assert_eq!(h.balances(), (Decimal::from(500), Decimal::from(300)));
    }

    #[tokio::test]
    async fn test_out_of_range_bonus_opens_nothing() {
        let h = TestHarness::new(1000, 500);

        let msg = h.coordinator.add_bonus(Decimal::MAX).await;
        assert!(msg.starts_with("Failed to add bonus. Error occurred:"), "{}", msg);
        assert!(msg.contains("out of range"), "{}", msg);
        assert!(h.coordinator_log.is_empty());
        assert!(h.coordinator.table().is_empty());
        assert_eq!(h.balances(), (Decimal::from(1000), Decimal::from(500)));
    }

    #[tokio::test]
    async fn test_dropped_request_still_decides() {
        let h = TestHarness::new(500, 300);
        h.transport
            .fail_method("B", "handle_prepare", Fault::Delay(Duration::from_millis(120)));
        h.transport
            .fail_method("B", "handle_commit", Fault::Delay(Duration::from_millis(120)));

        // the client gives up while the commit to B is in flight
        let gave_up = tokio::time::timeout(
            Duration::from_millis(200),
            h.coordinator.transfer("A", "B", Decimal::from(100)),
        )
        .await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(h.coordinator.table().is_empty());
        assert_eq!(h.balances(), (Decimal::from(400), Decimal::from(400)));
        assert_eq!(
            h.phases(),
            vec![
                (LogPhase::Prepare, "A".to_string()),
                (LogPhase::Prepare, "B".to_string()),
                (LogPhase::Commit, "A".to_string()),
                (LogPhase::Commit, "B".to_string()),
            ]
        );
        assert_eq!(h.b.pending_count(), 0);
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    #[tokio::test]
    async fn test_sweep_aborts_silent_transaction() {
        let h = TestHarness::new(500, 300);
        let changes = vec![
            BalanceChange::new(node("A", 8001, Some("A")), "A", Decimal::from(500), Decimal::from(400)),
            BalanceChange::new(node("B", 8002, Some("B")), "B", Decimal::from(300), Decimal::from(400)),
        ];
        // opened but no vote recorded yet
        let id = h.coordinator.table().open(changes, Instant::now());

        assert_eq!(h.coordinator.sweep_expired(Instant::now()).await, 0);
        let later = Instant::now() + TX_TIMEOUT + Duration::from_secs(1);
        assert_eq!(h.coordinator.sweep_expired(later).await, 1);

        assert!(!h.coordinator.table().contains(id));
        let phases: Vec<LogPhase> = h.phases().into_iter().map(|(p, _)| p).collect();
        assert_eq!(phases, vec![LogPhase::Abort, LogPhase::Abort]);
        assert_eq!(h.transport.call_count("A", "handle_abort"), 1);
        assert_eq!(h.transport.call_count("B", "handle_abort"), 1);

        // a late tally finds nothing to commit
        let outcome = h.coordinator.process_prepare_responses(id).await;
        assert!(!outcome.is_committed());
    }

    #[tokio::test]
    async fn test_abort_failures_are_swallowed() {
        let h = TestHarness::new(100, 300);
        h.transport.fail_method("B", "handle_abort", Fault::Unreachable);

        let msg = h.coordinator.transfer("A", "B", Decimal::from(200)).await;
        assert_eq!(msg, "Failed to transfer. Transaction aborted.");
        assert!(h.coordinator.table().is_empty());

        // B never heard the abort; its own sweep resolves it
        assert_eq!(h.b.pending_count(), 1);
        let later = Instant::now() + Duration::from_secs(10);
        assert_eq!(h.b.sweep_expired(later).await, 1);
        assert_eq!(h.balances(), (Decimal::from(100), Decimal::from(300)));
    }

    // ========================================================================
    // Known Gap: partial commit
    // ========================================================================

    #[tokio::test]
    async fn test_partial_commit_is_not_rolled_back() {
        let h = TestHarness::new(500, 300);
        h.transport.fail_method("B", "handle_commit", Fault::Unreachable);

        let outcome = {
            let a = node("A", 8001, Some("A"));
            let b = node("B", 8002, Some("B"));
            h.coordinator
                .propose_prepare(vec![
                    BalanceChange::new(a, "A", Decimal::from(500), Decimal::from(400)),
                    BalanceChange::new(b, "B", Decimal::from(300), Decimal::from(400)),
                ])
                .await
        };
        assert!(matches!(outcome, TxOutcome::Aborted { .. }));

        // A applied its commit before B failed and keeps it
        assert_eq!(h.balances(), (Decimal::from(400), Decimal::from(300)));

        // the coordinator log still holds A's commit, so recovery keeps it too
        h.a.recover().await.unwrap();
        assert_eq!(h.a.get_balance().unwrap(), Decimal::from(400));

        // B's commit was logged before its RPC failed; recovery applies it
        h.transport.heal("B");
        h.b.recover().await.unwrap();
        assert_eq!(h.balances(), (Decimal::from(400), Decimal::from(400)));
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    #[tokio::test]
    async fn test_restarted_participant_recovers_from_coordinator_log() {
        let h = TestHarness::new(500, 300);
        h.coordinator.transfer("A", "B", Decimal::from(100)).await;
        h.coordinator.transfer("B", "A", Decimal::from(50)).await;

        // simulated crash: the local ledger lost the last update
        h.a.set_balance(Decimal::from(123)).unwrap();
        h.a.forget_pending();

        h.a.handle(RpcRequest::Recover {}).await.unwrap();
        assert_eq!(h.a.get_balance().unwrap(), Decimal::from(450));
    }

    #[tokio::test]
    async fn test_ids_continue_after_restart() {
        let h = TestHarness::new(500, 300);
        h.coordinator.transfer("A", "B", Decimal::from(1)).await;
        h.coordinator.transfer("A", "B", Decimal::from(1)).await;

        let restarted = Coordinator::new(
            "coordinator",
            Default::default(),
            h.transport.clone(),
            h.coordinator_log.clone(),
            TX_TIMEOUT,
        )
        .unwrap();
        assert_eq!(restarted.table().open(vec![], Instant::now()), 3);
    }
}
