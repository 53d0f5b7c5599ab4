//! Concurrent opposite-direction transfer driver.
//!
//! Spawns `2 * pairs` threads released together by a start gate: half move
//! funds `a -> b`, half `b -> a`. Results are collected until `deadline`;
//! threads still blocked at that point are counted as hung and left detached.

use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use ledgerlock_accounts::{Strategy, TransferReceipt};
use ledgerlock_core::{AccountId, TransferError, TransferResult};

use crate::engine::TransferEngine;
use crate::store::AccountPersistence;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of `(a -> b, b -> a)` transfer pairs.
    pub pairs: usize,
    pub amount: Decimal,
    /// Wall-clock bound for the whole run.
    pub deadline: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pairs: 4,
            amount: Decimal::ONE,
            deadline: Duration::from_secs(5),
        }
    }
}

/// Outcome counts of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub strategy: Strategy,
    pub transfers: usize,
    pub committed: usize,
    pub deadlock_victims: usize,
    pub timeouts: usize,
    pub retries_exhausted: usize,
    pub other_failures: usize,
    /// Transfers that had not returned by the deadline.
    pub hung: usize,
    pub elapsed_ms: u64,
    /// Total balance after the run equals the total before it.
    pub conserved: bool,
}

impl SimulationReport {
    pub fn deadlocked(&self) -> bool {
        self.deadlock_victims > 0 || self.timeouts > 0 || self.hung > 0
    }

    pub fn all_committed(&self) -> bool {
        self.committed == self.transfers
    }
}

/// One-shot start signal: workers block in `wait` until it is opened or
/// cancelled. Cancelled when a spawn fails partway through.
#[derive(Default)]
struct StartGate {
    decided: Mutex<Option<bool>>,
    changed: Condvar,
}

impl StartGate {
    fn release(&self, go: bool) {
        *self.decided.lock().unwrap_or_else(PoisonError::into_inner) = Some(go);
        self.changed.notify_all();
    }

    /// `true` once opened, `false` once cancelled.
    fn wait(&self) -> bool {
        let mut decided = self.decided.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(go) = *decided {
                return go;
            }
            decided = self
                .changed
                .wait(decided)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub struct DeadlockSimulator<P> {
    engine: Arc<TransferEngine<P>>,
    a: AccountId,
    b: AccountId,
}

impl<P> DeadlockSimulator<P>
where
    P: AccountPersistence + 'static,
{
    pub fn new(engine: Arc<TransferEngine<P>>, a: AccountId, b: AccountId) -> Self {
        Self { engine, a, b }
    }

    pub fn run(
        &self,
        strategy: Strategy,
        config: &SimulationConfig,
    ) -> TransferResult<SimulationReport> {
        let total_before = self.engine.store().total_balance()?;
        let transfers = config.pairs * 2;
        let gate = Arc::new(StartGate::default());
        let (tx, rx) = mpsc::channel::<TransferResult<TransferReceipt>>();
        let started = Instant::now();

        info!(strategy = %strategy, transfers, "simulation started");

        for i in 0..transfers {
            let (from, to) = if i % 2 == 0 {
                (self.a, self.b)
            } else {
                (self.b, self.a)
            };
            let engine = self.engine.clone();
            let worker_gate = gate.clone();
            let tx = tx.clone();
            let amount = config.amount;

            let spawned = thread::Builder::new()
                .name(format!("sim-{strategy}-{i}"))
                .spawn(move || {
                    if worker_gate.wait() {
                        let _ = tx.send(engine.transfer(strategy, from, to, amount));
                    }
                });
            if let Err(e) = spawned {
                gate.release(false);
                return Err(TransferError::storage(format!("failed to spawn worker: {e}")));
            }
        }
        drop(tx);
        gate.release(true);

        let mut report = SimulationReport {
            strategy,
            transfers,
            committed: 0,
            deadlock_victims: 0,
            timeouts: 0,
            retries_exhausted: 0,
            other_failures: 0,
            hung: 0,
            elapsed_ms: 0,
            conserved: false,
        };

        let deadline = started + config.deadline;
        let mut received = 0;
        while received < transfers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(result) => {
                    received += 1;
                    match result {
                        Ok(_) => report.committed += 1,
                        Err(TransferError::DeadlockVictim { .. }) => report.deadlock_victims += 1,
                        Err(TransferError::LockTimeout { .. }) => report.timeouts += 1,
                        Err(TransferError::RetryExhausted { .. }) => report.retries_exhausted += 1,
                        Err(_) => report.other_failures += 1,
                    }
                }
                Err(_) => break,
            }
        }

        report.hung = transfers - received;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report.conserved = self.engine.store().total_balance()? == total_before;

        if report.hung > 0 {
            warn!(strategy = %strategy, hung = report.hung, "transfers still blocked at deadline");
        }
        info!(
            strategy = %strategy,
            committed = report.committed,
            deadlock_victims = report.deadlock_victims,
            timeouts = report.timeouts,
            elapsed_ms = report.elapsed_ms,
            "simulation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancelled_gate_releases_waiters_without_running_them() {
        let gate = Arc::new(StartGate::default());
        let ran = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let ran = ran.clone();
                thread::spawn(move || {
                    if gate.wait() {
                        ran.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        gate.release(false);
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn opened_gate_lets_late_arrivals_through() {
        let gate = StartGate::default();
        gate.release(true);
        assert!(gate.wait());
    }
}
