use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use burnflip_types::{AdmissionError, BuybackError, LedgerError, RoundStatus};
use tempfile::TempDir;

use crate::{
    Engine, EngineConfig, LedgerClient, Quote, ReconcileError, ReconcileOutcome, ResolvedPayment,
    Store, StoreCaps, SwapReceipt, SwapVenue, TransferRecord,
};

const VAULT: &str = "vault-address";
const BURN_TOKEN: &str = "burn-token";

#[derive(Clone, Default)]
struct MockLedger {
    payments: Arc<Mutex<HashMap<String, ResolvedPayment>>>,
    balance: Arc<AtomicU64>,
    fail_balance: Arc<AtomicBool>,
    fail_payout: Arc<AtomicBool>,
    payouts: Arc<Mutex<Vec<(String, u64)>>>,
    payout_seq: Arc<AtomicU64>,
}

impl MockLedger {
    fn insert_payment(&self, reference: &str, sender: &str, amount: u64) {
        self.payments.lock().unwrap().insert(
            reference.to_string(),
            ResolvedPayment {
                sender: sender.to_string(),
                succeeded: true,
                transfers: vec![TransferRecord {
                    destination: VAULT.to_string(),
                    amount,
                }],
            },
        );
    }

    fn insert_raw(&self, reference: &str, payment: ResolvedPayment) {
        self.payments
            .lock()
            .unwrap()
            .insert(reference.to_string(), payment);
    }

    fn submitted_payouts(&self) -> Vec<(String, u64)> {
        self.payouts.lock().unwrap().clone()
    }
}

impl LedgerClient for MockLedger {
    async fn resolve_payment(
        &self,
        reference: &str,
    ) -> Result<Option<ResolvedPayment>, LedgerError> {
        Ok(self.payments.lock().unwrap().get(reference).cloned())
    }

    async fn balance(&self, _address: &str) -> Result<u64, LedgerError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(LedgerError::Timeout);
        }
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn submit_payout(&self, destination: &str, amount: u64) -> Result<String, LedgerError> {
        if self.fail_payout.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger down".to_string()));
        }
        self.payouts
            .lock()
            .unwrap()
            .push((destination.to_string(), amount));
        let seq = self.payout_seq.fetch_add(1, Ordering::SeqCst);
        Ok(format!("payout-{seq}"))
    }
}

#[derive(Clone, Default)]
struct MockVenue {
    fail_quote: Arc<AtomicBool>,
    swaps: Arc<Mutex<Vec<u64>>>,
}

impl SwapVenue for MockVenue {
    async fn ensure_burn_account(&self, _token: &str) -> Result<String, BuybackError> {
        Ok("burn-destination".to_string())
    }

    async fn quote(
        &self,
        amount: u64,
        _token: &str,
        _slippage_bps: u64,
    ) -> Result<Quote, BuybackError> {
        if self.fail_quote.load(Ordering::SeqCst) {
            return Err(BuybackError::QuoteUnavailable);
        }
        Ok(Quote {
            quote_id: "quote-1".to_string(),
            amount_in: amount,
            expected_out: amount * 2,
        })
    }

    async fn execute_swap(
        &self,
        quote: &Quote,
        _destination: &str,
    ) -> Result<SwapReceipt, BuybackError> {
        self.swaps.lock().unwrap().push(quote.amount_in);
        Ok(SwapReceipt {
            reference: "swap-1".to_string(),
            output_amount: quote.expected_out,
        })
    }
}

fn test_config(store_path: PathBuf) -> EngineConfig {
    EngineConfig {
        receiving_address: VAULT.to_string(),
        burn_token: BURN_TOKEN.to_string(),
        store_path: Some(store_path),
        ..EngineConfig::default()
    }
}

fn open_engine(
    config: EngineConfig,
    ledger: MockLedger,
    venue: MockVenue,
) -> Arc<Engine<MockLedger, MockVenue>> {
    let caps = StoreCaps {
        replay_guard_cap: config.replay_guard_cap(),
        history_cap: config.history_cap(),
        feed_cap: config.feed_cap(),
    };
    let path = config.store_path.clone().unwrap();
    let (store, loaded) = Store::open(&path, caps).unwrap();
    Arc::new(Engine::new(config, store, loaded, ledger, venue))
}

fn rich_ledger() -> MockLedger {
    let ledger = MockLedger::default();
    ledger.balance.store(1_000_000_000, Ordering::SeqCst);
    ledger
}

#[tokio::test]
async fn test_admit_credits_open_round() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 100);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger,
        MockVenue::default(),
    );

    let summary = engine.admit("ref-1", 100).await.unwrap();
    assert_eq!(summary.id, 1);
    assert_eq!(summary.pot_total, 100);
    assert_eq!(summary.participant_count, 1);
    assert_eq!(summary.entry_count, 1);
    assert_eq!(summary.status, RoundStatus::Open);
}

#[tokio::test]
async fn test_duplicate_reference_is_rejected_without_crediting() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 100);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger,
        MockVenue::default(),
    );

    engine.admit("ref-1", 100).await.unwrap();
    let err = engine.admit("ref-1", 100).await.unwrap_err();
    assert!(matches!(err, AdmissionError::DuplicateReference));
    assert_eq!(engine.current_summary().await.pot_total, 100);
}

#[tokio::test]
async fn test_concurrent_admissions_of_one_reference_credit_once() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 100);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger,
        MockVenue::default(),
    );

    let (left, right) = tokio::join!(engine.admit("ref-1", 100), engine.admit("ref-1", 100));
    assert_eq!(
        left.is_ok() as usize + right.is_ok() as usize,
        1,
        "exactly one admission must win"
    );
    assert_eq!(engine.current_summary().await.pot_total, 100);
}

#[tokio::test]
async fn test_amount_mismatch_leaves_round_untouched() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 90);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger,
        MockVenue::default(),
    );

    let err = engine.admit("ref-1", 100).await.unwrap_err();
    assert!(matches!(
        err,
        AdmissionError::AmountMismatch {
            expected: 100,
            actual: 90
        }
    ));
    assert_eq!(engine.current_summary().await.pot_total, 0);

    // The reference was not consumed; a corrected claim succeeds.
    let summary = engine.admit("ref-1", 90).await.unwrap();
    assert_eq!(summary.pot_total, 90);
}

#[tokio::test]
async fn test_unresolvable_payments_are_rejected() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_raw(
        "ref-failed",
        ResolvedPayment {
            sender: "alice".to_string(),
            succeeded: false,
            transfers: vec![TransferRecord {
                destination: VAULT.to_string(),
                amount: 100,
            }],
        },
    );
    ledger.insert_raw(
        "ref-elsewhere",
        ResolvedPayment {
            sender: "bob".to_string(),
            succeeded: true,
            transfers: vec![TransferRecord {
                destination: "someone-else".to_string(),
                amount: 100,
            }],
        },
    );
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger,
        MockVenue::default(),
    );

    assert!(matches!(
        engine.admit("ref-missing", 100).await.unwrap_err(),
        AdmissionError::PaymentNotFound
    ));
    assert!(matches!(
        engine.admit("ref-failed", 100).await.unwrap_err(),
        AdmissionError::PaymentFailed
    ));
    assert!(matches!(
        engine.admit("ref-elsewhere", 100).await.unwrap_err(),
        AdmissionError::NoMatchingTransfer
    ));
    assert!(matches!(
        engine.admit("   ", 100).await.unwrap_err(),
        AdmissionError::InvalidReference
    ));
    assert!(matches!(
        engine.admit("ref-1", 0).await.unwrap_err(),
        AdmissionError::InvalidAmount
    ));
}

#[tokio::test]
async fn test_replay_guard_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.sqlite");
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 100);

    {
        let engine = open_engine(test_config(path.clone()), ledger.clone(), MockVenue::default());
        engine.admit("ref-1", 100).await.unwrap();
    }

    let engine = open_engine(test_config(path), ledger, MockVenue::default());
    let summary = engine.current_summary().await;
    assert_eq!(summary.pot_total, 100);
    assert!(matches!(
        engine.admit("ref-1", 100).await.unwrap_err(),
        AdmissionError::DuplicateReference
    ));
}

#[tokio::test]
async fn test_quorum_not_met_defers_by_full_interval() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 100);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger,
        MockVenue::default(),
    );

    engine.admit("ref-1", 100).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    let tick = deadline + 1;
    engine.check_round(tick).await;

    let summary = engine.current_summary().await;
    assert_eq!(summary.status, RoundStatus::Open);
    assert_eq!(summary.id, 1);
    assert_eq!(
        summary.closes_at_ms,
        tick + engine.config.round_interval_ms()
    );
    assert!(engine.history(10).await.is_empty());
}

#[tokio::test]
async fn test_settlement_pays_winner_and_burns_remainder() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    let venue = MockVenue::default();
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger.clone(),
        venue.clone(),
    );

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    engine.check_round(deadline + 1).await;

    let summary = engine.current_summary().await;
    assert_eq!(summary.id, 2);
    assert_eq!(summary.status, RoundStatus::Open);
    assert_eq!(summary.pot_total, 0);

    let history = engine.history(10).await;
    assert_eq!(history.len(), 1);
    let settled = &history[0];
    assert_eq!(settled.id, 1);
    assert_eq!(settled.status, RoundStatus::Complete);
    let winner = settled.winner.as_ref().unwrap();
    assert!(winner.participant == "alice" || winner.participant == "bob");
    assert_eq!(winner.payout_amount, 50);
    assert_eq!(settled.buyback_amount, 50);
    assert!(settled.payout_reference.is_some());

    assert_eq!(
        ledger.submitted_payouts(),
        vec![(winner.participant.clone(), 50)]
    );
    assert_eq!(*venue.swaps.lock().unwrap(), vec![50]);

    let payouts = engine.recent_payouts(10).await;
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].round_id, 1);
    assert_eq!(payouts[0].amount, 50);

    let burns = engine.recent_burns(10).await;
    assert_eq!(burns.len(), 1);
    assert_eq!(burns[0].amount, 50);
    assert_eq!(burns[0].output_amount, 100);
}

#[tokio::test]
async fn test_reserve_shortfall_defers_by_retry_interval() {
    let dir = TempDir::new().unwrap();
    let ledger = MockLedger::default();
    ledger.balance.store(10, Ordering::SeqCst);
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger.clone(),
        MockVenue::default(),
    );

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    let tick = deadline + 1;
    engine.check_round(tick).await;

    let summary = engine.current_summary().await;
    assert_eq!(summary.id, 1);
    assert_eq!(summary.status, RoundStatus::Open);
    assert_eq!(summary.pot_total, 100);
    assert_eq!(
        summary.closes_at_ms,
        tick + engine.config.retry_interval_ms()
    );
    assert!(ledger.submitted_payouts().is_empty());

    // Once the balance recovers the round settles on the next due tick.
    ledger.balance.store(1_000_000, Ordering::SeqCst);
    engine.check_round(summary.closes_at_ms + 1).await;
    assert_eq!(engine.current_summary().await.id, 2);
    assert_eq!(engine.history(10).await.len(), 1);
}

#[tokio::test]
async fn test_balance_check_failure_defers() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.fail_balance.store(true, Ordering::SeqCst);
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger.clone(),
        MockVenue::default(),
    );

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    engine.check_round(deadline + 1).await;

    let summary = engine.current_summary().await;
    assert_eq!(summary.status, RoundStatus::Open);
    assert_eq!(summary.pot_total, 100);
    assert!(ledger.submitted_payouts().is_empty());
}

#[tokio::test]
async fn test_payout_failure_leaves_round_settling() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.fail_payout.store(true, Ordering::SeqCst);
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    ledger.insert_payment("ref-3", "carol", 10);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger,
        MockVenue::default(),
    );

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    engine.check_round(deadline + 1).await;

    let summary = engine.current_summary().await;
    assert_eq!(summary.id, 1);
    assert_eq!(summary.status, RoundStatus::Settling);
    assert!(engine.history(10).await.is_empty());

    // A stuck round admits nothing and does not settle on later ticks.
    assert!(matches!(
        engine.admit("ref-3", 10).await.unwrap_err(),
        AdmissionError::RoundClosed
    ));
    engine.check_round(deadline + 1_000_000).await;
    assert_eq!(engine.current_summary().await.status, RoundStatus::Settling);
}

#[tokio::test]
async fn test_settling_round_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.sqlite");
    let ledger = rich_ledger();
    ledger.fail_payout.store(true, Ordering::SeqCst);
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);

    {
        let engine = open_engine(test_config(path.clone()), ledger.clone(), MockVenue::default());
        engine.admit("ref-1", 60).await.unwrap();
        engine.admit("ref-2", 40).await.unwrap();
        let deadline = engine.current_summary().await.closes_at_ms;
        engine.check_round(deadline + 1).await;
        assert_eq!(engine.current_summary().await.status, RoundStatus::Settling);
    }

    let engine = open_engine(test_config(path), ledger, MockVenue::default());
    let summary = engine.current_summary().await;
    assert_eq!(summary.id, 1);
    assert_eq!(summary.status, RoundStatus::Settling);
    assert_eq!(summary.pot_total, 100);
}

#[tokio::test]
async fn test_reconcile_unpaid_reopens_round() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.fail_payout.store(true, Ordering::SeqCst);
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger.clone(),
        MockVenue::default(),
    );

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    engine.check_round(deadline + 1).await;
    assert_eq!(engine.current_summary().await.status, RoundStatus::Settling);

    let summary = engine.reconcile(1, ReconcileOutcome::Unpaid).await.unwrap();
    assert_eq!(summary.status, RoundStatus::Open);
    assert_eq!(summary.pot_total, 100);

    // Payouts work again; the reopened round settles normally.
    ledger.fail_payout.store(false, Ordering::SeqCst);
    engine.check_round(summary.closes_at_ms + 1).await;
    assert_eq!(engine.current_summary().await.id, 2);
    assert_eq!(ledger.submitted_payouts().len(), 1);
}

#[tokio::test]
async fn test_reconcile_paid_completes_round() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.fail_payout.store(true, Ordering::SeqCst);
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    let venue = MockVenue::default();
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger.clone(),
        venue.clone(),
    );

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    engine.check_round(deadline + 1).await;

    assert!(matches!(
        engine
            .reconcile(
                1,
                ReconcileOutcome::Paid {
                    participant: "mallory".to_string(),
                    payout_reference: "tx-manual".to_string(),
                },
            )
            .await
            .unwrap_err(),
        ReconcileError::UnknownParticipant
    ));

    let summary = engine
        .reconcile(
            1,
            ReconcileOutcome::Paid {
                participant: "bob".to_string(),
                payout_reference: "tx-manual".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(summary.id, 2);
    assert_eq!(summary.status, RoundStatus::Open);

    let history = engine.history(10).await;
    assert_eq!(history.len(), 1);
    let settled = &history[0];
    assert_eq!(settled.status, RoundStatus::Complete);
    assert_eq!(settled.winner.as_ref().unwrap().participant, "bob");
    assert_eq!(settled.winner.as_ref().unwrap().payout_amount, 50);
    assert_eq!(settled.payout_reference.as_deref(), Some("tx-manual"));
    // No new ledger transfer was submitted; the operator confirmed the
    // existing one.
    assert!(ledger.submitted_payouts().is_empty());
    assert_eq!(*venue.swaps.lock().unwrap(), vec![50]);
}

#[tokio::test]
async fn test_reconcile_rejects_rounds_not_stuck() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        rich_ledger(),
        MockVenue::default(),
    );

    assert!(matches!(
        engine.reconcile(5, ReconcileOutcome::Unpaid).await.unwrap_err(),
        ReconcileError::NotCurrentRound
    ));
    assert!(matches!(
        engine.reconcile(1, ReconcileOutcome::Unpaid).await.unwrap_err(),
        ReconcileError::NotSettling
    ));
}

#[tokio::test]
async fn test_buyback_failure_does_not_block_completion() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    let venue = MockVenue::default();
    venue.fail_quote.store(true, Ordering::SeqCst);
    let engine = open_engine(
        test_config(dir.path().join("engine.sqlite")),
        ledger.clone(),
        venue.clone(),
    );

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    engine.check_round(deadline + 1).await;

    assert_eq!(engine.current_summary().await.id, 2);
    let history = engine.history(10).await;
    assert_eq!(history[0].status, RoundStatus::Complete);
    assert_eq!(ledger.submitted_payouts().len(), 1);
    assert!(venue.swaps.lock().unwrap().is_empty());
    assert!(engine.recent_burns(10).await.is_empty());
}

#[tokio::test]
async fn test_max_buyback_per_cycle_clamps_swap() {
    let dir = TempDir::new().unwrap();
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);
    let venue = MockVenue::default();
    let mut config = test_config(dir.path().join("engine.sqlite"));
    config.max_buyback_per_cycle = Some(30);
    let engine = open_engine(config, ledger, venue.clone());

    engine.admit("ref-1", 60).await.unwrap();
    engine.admit("ref-2", 40).await.unwrap();
    let deadline = engine.current_summary().await.closes_at_ms;
    engine.check_round(deadline + 1).await;

    assert_eq!(*venue.swaps.lock().unwrap(), vec![30]);
    let burns = engine.recent_burns(10).await;
    assert_eq!(burns[0].amount, 30);
}

#[tokio::test]
async fn test_history_and_state_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.sqlite");
    let ledger = rich_ledger();
    ledger.insert_payment("ref-1", "alice", 60);
    ledger.insert_payment("ref-2", "bob", 40);

    {
        let engine = open_engine(test_config(path.clone()), ledger.clone(), MockVenue::default());
        engine.admit("ref-1", 60).await.unwrap();
        engine.admit("ref-2", 40).await.unwrap();
        let deadline = engine.current_summary().await.closes_at_ms;
        engine.check_round(deadline + 1).await;
        assert_eq!(engine.current_summary().await.id, 2);
    }

    let engine = open_engine(test_config(path), ledger, MockVenue::default());
    let summary = engine.current_summary().await;
    assert_eq!(summary.id, 2);
    assert_eq!(summary.status, RoundStatus::Open);

    let history = engine.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, 1);
    assert_eq!(history[0].status, RoundStatus::Complete);

    assert_eq!(engine.recent_payouts(10).await.len(), 1);
    assert_eq!(engine.recent_burns(10).await.len(), 1);
}
