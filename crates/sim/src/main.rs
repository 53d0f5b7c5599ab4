//! Runs every transfer strategy against the same two-account scenario and
//! prints one JSON report per strategy.
//!
//! Store/engine settings come from `LEDGER_*` variables (see `LedgerConfig`);
//! `LEDGER_SIM_PAIRS`, `LEDGER_SIM_LOCK_GAP_MS` and `LEDGER_SIM_DEADLINE_MS`
//! shape the run itself.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;

use ledgerlock_accounts::Strategy;
use ledgerlock_core::AccountId;
use ledgerlock_infra::{
    AccountStore, DeadlockSimulator, LedgerConfig, SimulationConfig, TransferEngine,
};

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid number; using default");
            default
        }),
        Err(_) => default,
    }
}

fn main() -> anyhow::Result<()> {
    ledgerlock_observability::init();

    let config = LedgerConfig::from_env();
    let pairs = env_u64("LEDGER_SIM_PAIRS", 4) as usize;
    let lock_gap = Duration::from_millis(env_u64("LEDGER_SIM_LOCK_GAP_MS", 50));
    let deadline = Duration::from_millis(env_u64("LEDGER_SIM_DEADLINE_MS", 5_000));

    if !config.deadlock_detection && config.lock_timeout.is_none() {
        tracing::warn!(
            "deadlock detection off and no lock timeout: naive and pessimistic runs will hang until the deadline"
        );
    }

    let (a, b) = (AccountId::new(1), AccountId::new(2));
    let sim_config = SimulationConfig {
        pairs,
        amount: Decimal::from(10),
        deadline,
    };

    let mut reports = Vec::with_capacity(Strategy::ALL.len());
    for strategy in Strategy::ALL {
        // Fresh ledger per strategy: hung threads from one run keep their locks.
        let store = Arc::new(AccountStore::in_memory(config.store_options()));
        store
            .seed([(a, Decimal::from(100)), (b, Decimal::from(50))])
            .context("seed accounts")?;
        let engine = TransferEngine::from_config(store, &config).with_lock_gap(lock_gap);

        let report = DeadlockSimulator::new(Arc::new(engine), a, b)
            .run(strategy, &sim_config)
            .with_context(|| format!("simulate {strategy}"))?;
        reports.push(report);
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);

    // Hung worker threads would otherwise keep the process alive.
    std::process::exit(0);
}
