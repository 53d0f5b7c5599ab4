//! Black-box scenarios through the public `ledgerlock_infra` API.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use ledgerlock_accounts::{OverdraftPolicy, Strategy};
use ledgerlock_core::{AccountId, TransferError};
use ledgerlock_infra::{
    AccountStore, DeadlockSimulator, LedgerConfig, SimulationConfig, SimulationReport, TransferEngine,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn engine(config: &LedgerConfig, lock_gap_ms: Option<u64>) -> TransferEngine {
    let store = Arc::new(AccountStore::in_memory(config.store_options()));
    store
        .seed([
            (AccountId::new(1), dec("100")),
            (AccountId::new(2), dec("50")),
        ])
        .unwrap();
    let engine = TransferEngine::from_config(store, config);
    match lock_gap_ms {
        Some(ms) => engine.with_lock_gap(Duration::from_millis(ms)),
        None => engine,
    }
}

fn simulate(engine: TransferEngine, strategy: Strategy, pairs: usize) -> SimulationReport {
    let simulator = DeadlockSimulator::new(Arc::new(engine), AccountId::new(1), AccountId::new(2));
    simulator
        .run(
            strategy,
            &SimulationConfig {
                pairs,
                amount: dec("5"),
                deadline: Duration::from_secs(10),
            },
        )
        .unwrap()
}

#[test]
fn ordered_transfer_scenario() {
    let engine = engine(&LedgerConfig::default(), None);
    engine
        .transfer_ordered(AccountId::new(1), AccountId::new(2), dec("30"))
        .unwrap();

    let store = engine.store();
    assert_eq!(store.get(AccountId::new(1)).unwrap().balance(), dec("70"));
    assert_eq!(store.get(AccountId::new(2)).unwrap().balance(), dec("80"));
}

#[test]
fn overdraft_scenario_without_floor() {
    let engine = engine(&LedgerConfig::default(), None);
    engine
        .transfer_naive(AccountId::new(1), AccountId::new(2), dec("1000"))
        .unwrap();
    assert_eq!(
        engine.store().get(AccountId::new(1)).unwrap().balance(),
        dec("-900")
    );
}

#[test]
fn overdraft_scenario_with_floor() {
    let engine = engine(
        &LedgerConfig::default().with_overdraft(OverdraftPolicy::Reject),
        None,
    );
    let err = engine
        .transfer_naive(AccountId::new(1), AccountId::new(2), dec("1000"))
        .unwrap_err();
    assert_eq!(
        err,
        TransferError::InsufficientFunds {
            account: AccountId::new(1),
            balance: dec("100"),
            requested: dec("1000"),
        }
    );
}

#[test]
fn unknown_account_scenario() {
    let engine = engine(&LedgerConfig::default(), None);
    let err = engine
        .transfer_ordered(AccountId::new(999), AccountId::new(1), dec("10"))
        .unwrap_err();
    assert_eq!(err, TransferError::NotFound(AccountId::new(999)));
}

#[test]
fn simulated_naive_run_detects_deadlock() {
    let report = simulate(engine(&LedgerConfig::default(), Some(50)), Strategy::Naive, 1);
    assert!(report.deadlocked(), "{report:?}");
    assert_eq!(report.deadlock_victims, 1);
    assert_eq!(report.hung, 0);
    assert!(report.conserved);
}

#[test]
fn simulated_ordered_run_commits_everything() {
    let config = LedgerConfig::default().with_deadlock_detection(false);
    let report = simulate(engine(&config, Some(5)), Strategy::Ordered, 6);
    assert!(report.all_committed(), "{report:?}");
    assert!(!report.deadlocked());
    assert!(report.conserved);
}

#[test]
fn simulated_retried_run_commits_everything() {
    let config = LedgerConfig::default().with_retry(5, Duration::from_millis(30));
    let report = simulate(engine(&config, Some(20)), Strategy::Retried, 1);
    assert!(report.all_committed(), "{report:?}");
    assert_eq!(report.retries_exhausted, 0);
    assert!(report.conserved);
}

#[test]
fn simulated_pessimistic_run_without_detection_times_out() {
    let config = LedgerConfig::default()
        .with_deadlock_detection(false)
        .with_lock_timeout(Duration::from_millis(200));
    let report = simulate(engine(&config, Some(50)), Strategy::Pessimistic, 1);
    assert!(report.timeouts >= 1, "{report:?}");
    assert_eq!(report.hung, 0);
    assert!(report.conserved);
}

#[test]
fn report_serializes_for_the_cli() {
    let report = simulate(engine(&LedgerConfig::default(), Some(0)), Strategy::Ordered, 1);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["strategy"], "ordered");
    assert_eq!(json["transfers"], 2);
}
