//! Transfer engine: four concurrency-control strategies over one `AccountStore`.
//!
//! | strategy | lock order | lock mode | on conflict |
//! |---|---|---|---|
//! | naive | caller order | default | surfaced |
//! | ordered | `LockOrderingPolicy` | default | surfaced |
//! | retried | caller order | default | retried per `RetryPolicy` |
//! | pessimistic | caller order | for update | surfaced |
//!
//! Every attempt is all-or-nothing: balances are computed on the guards'
//! working copies and published with a single `save_all`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use ledgerlock_accounts::{
    LockOrderingPolicy, OverdraftPolicy, RetryPolicy, Strategy, TransferAttempt, TransferReceipt,
    TransferRequest, TransferState,
};
use ledgerlock_core::{AccountId, TransferError, TransferId, TransferResult};

use crate::config::LedgerConfig;
use crate::store::{AccountPersistence, AccountStore, InMemoryPersistence, LockMode};

pub struct TransferEngine<P = InMemoryPersistence> {
    store: Arc<AccountStore<P>>,
    ordering: LockOrderingPolicy,
    retry: RetryPolicy,
    overdraft: OverdraftPolicy,
    lock_gap: Option<Duration>,
}

impl<P: AccountPersistence> TransferEngine<P> {
    pub fn new(store: Arc<AccountStore<P>>) -> Self {
        Self {
            store,
            ordering: LockOrderingPolicy::ascending(),
            retry: RetryPolicy::default(),
            overdraft: OverdraftPolicy::default(),
            lock_gap: None,
        }
    }

    /// Engine settings taken from `config`. Store settings are applied when
    /// the store is built (see `LedgerConfig::store_options`).
    pub fn from_config(store: Arc<AccountStore<P>>, config: &LedgerConfig) -> Self {
        Self::new(store)
            .with_retry_policy(config.retry_policy())
            .with_overdraft(config.overdraft)
    }

    pub fn with_ordering(mut self, ordering: LockOrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_overdraft(mut self, overdraft: OverdraftPolicy) -> Self {
        self.overdraft = overdraft;
        self
    }

    /// Pause between the first and second lock acquisition of every attempt.
    ///
    /// Widens the window in which two opposite-direction transfers each hold
    /// one lock; used to reproduce deadlocks on demand.
    pub fn with_lock_gap(mut self, gap: Duration) -> Self {
        self.lock_gap = Some(gap);
        self
    }

    pub fn store(&self) -> &Arc<AccountStore<P>> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn transfer(
        &self,
        strategy: Strategy,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> TransferResult<TransferReceipt> {
        match strategy {
            Strategy::Naive => self.transfer_naive(from, to, amount),
            Strategy::Ordered => self.transfer_ordered(from, to, amount),
            Strategy::Retried => self.transfer_with_retry(from, to, amount),
            Strategy::Pessimistic => self.transfer_pessimistic(from, to, amount),
        }
    }

    /// Locks `from` then `to`. Opposite-direction calls can deadlock.
    pub fn transfer_naive(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> TransferResult<TransferReceipt> {
        self.run_once(Strategy::Naive, from, to, amount)
    }

    /// Locks both accounts in canonical order, whatever the direction.
    pub fn transfer_ordered(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> TransferResult<TransferReceipt> {
        self.run_once(Strategy::Ordered, from, to, amount)
    }

    /// Locks both accounts with for-update locks, in caller order.
    pub fn transfer_pessimistic(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> TransferResult<TransferReceipt> {
        self.run_once(Strategy::Pessimistic, from, to, amount)
    }

    /// Naive acquisition; lock conflicts and deadlock victims restart the whole
    /// attempt after the policy's backoff, up to `max_attempts` attempts.
    pub fn transfer_with_retry(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> TransferResult<TransferReceipt> {
        let request = TransferRequest::new(from, to, amount)?;
        let transfer_id = TransferId::new();

        let mut attempt = 1;
        loop {
            match self.attempt(Strategy::Retried, &request, transfer_id, attempt) {
                Ok(()) => return Ok(self.receipt(Strategy::Retried, &request, transfer_id, attempt)),
                Err(err) if self.retry.should_retry(attempt, &err) => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        transfer_id = %transfer_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transfer attempt lost a lock conflict; retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    warn!(transfer_id = %transfer_id, attempts = attempt, error = %err, "retries exhausted");
                    return Err(TransferError::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn run_once(
        &self,
        strategy: Strategy,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> TransferResult<TransferReceipt> {
        let request = TransferRequest::new(from, to, amount)?;
        let transfer_id = TransferId::new();
        self.attempt(strategy, &request, transfer_id, 1)?;
        Ok(self.receipt(strategy, &request, transfer_id, 1))
    }

    fn attempt(
        &self,
        strategy: Strategy,
        request: &TransferRequest,
        transfer_id: TransferId,
        number: u32,
    ) -> TransferResult<()> {
        let mut attempt = TransferAttempt::start(transfer_id, number);
        debug!(
            transfer_id = %transfer_id,
            strategy = %strategy,
            attempt = number,
            from = %request.from,
            to = %request.to,
            amount = %request.amount,
            "transfer attempt started"
        );

        let result = self.execute(strategy, request, &mut attempt);
        match &result {
            Ok(()) => info!(
                transfer_id = %transfer_id,
                strategy = %strategy,
                attempt = number,
                from = %request.from,
                to = %request.to,
                amount = %request.amount,
                "transfer committed"
            ),
            Err(err) => {
                let state = attempt.terminate();
                debug!(
                    transfer_id = %transfer_id,
                    strategy = %strategy,
                    attempt = number,
                    state = ?state,
                    kind = err.kind(),
                    error = %err,
                    "transfer attempt ended without commit"
                );
            }
        }
        result
    }

    // Guards are dropped (locks released) when this returns, on every path.
    fn execute(
        &self,
        strategy: Strategy,
        request: &TransferRequest,
        attempt: &mut TransferAttempt,
    ) -> TransferResult<()> {
        let (first, second, mode) = match strategy {
            Strategy::Naive | Strategy::Retried => (request.from, request.to, LockMode::Default),
            Strategy::Ordered => {
                let (first, second) = self.ordering.order(request.from, request.to);
                (first, second, LockMode::Default)
            }
            Strategy::Pessimistic => (request.from, request.to, LockMode::ForUpdate),
        };
        let owner = attempt.transfer_id;

        let mut first_guard = self.store.lock(first, owner, mode)?;
        if let Some(gap) = self.lock_gap {
            thread::sleep(gap);
        }
        let mut second_guard = self.store.lock(second, owner, mode)?;
        attempt.advance(TransferState::LocksAcquired)?;
        debug!(
            transfer_id = %owner,
            state = ?attempt.state(),
            first = %first,
            second = %second,
            "locks acquired"
        );

        let (from, to) = if first == request.from {
            (&mut first_guard, &mut second_guard)
        } else {
            (&mut second_guard, &mut first_guard)
        };
        from.account_mut().debit(request.amount, self.overdraft)?;
        to.account_mut().credit(request.amount)?;
        attempt.advance(TransferState::BalancesComputed)?;
        debug!(
            transfer_id = %owner,
            state = ?attempt.state(),
            from_balance = %from.account().balance(),
            to_balance = %to.account().balance(),
            "balances computed"
        );

        self.store.save_all(&mut [from, to])?;
        attempt.advance(TransferState::Committed)
    }

    fn receipt(
        &self,
        strategy: Strategy,
        request: &TransferRequest,
        transfer_id: TransferId,
        attempts: u32,
    ) -> TransferReceipt {
        TransferReceipt {
            transfer_id,
            strategy,
            from: request.from,
            to: request.to,
            amount: request.amount,
            attempts,
            committed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn engine() -> TransferEngine {
        let store = Arc::new(AccountStore::in_memory(StoreOptions::default()));
        store
            .seed([
                (AccountId::new(1), dec("100")),
                (AccountId::new(2), dec("50")),
            ])
            .unwrap();
        TransferEngine::new(store)
    }

    fn balance(engine: &TransferEngine, id: u64) -> Decimal {
        engine.store().get(AccountId::new(id)).unwrap().balance()
    }

    #[test]
    fn ordered_transfer_moves_funds() {
        let engine = engine();
        let receipt = engine
            .transfer_ordered(AccountId::new(1), AccountId::new(2), dec("30"))
            .unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.strategy, Strategy::Ordered);
        assert_eq!(balance(&engine, 1), dec("70"));
        assert_eq!(balance(&engine, 2), dec("80"));
    }

    #[test]
    fn every_strategy_moves_funds_in_both_directions() {
        let engine = engine();
        for strategy in Strategy::ALL {
            engine
                .transfer(strategy, AccountId::new(1), AccountId::new(2), dec("10.25"))
                .unwrap();
            engine
                .transfer(strategy, AccountId::new(2), AccountId::new(1), dec("0.25"))
                .unwrap();
        }
        assert_eq!(balance(&engine, 1), dec("60"));
        assert_eq!(balance(&engine, 2), dec("90"));
    }

    #[test]
    fn unknown_account_is_not_found() {
        let engine = engine();
        let err = engine
            .transfer_ordered(AccountId::new(999), AccountId::new(1), dec("10"))
            .unwrap_err();
        assert_eq!(err, TransferError::NotFound(AccountId::new(999)));
        assert_eq!(balance(&engine, 1), dec("100"));
    }

    #[test]
    fn self_transfer_is_rejected_by_every_strategy() {
        let engine = engine();
        for strategy in Strategy::ALL {
            let err = engine
                .transfer(strategy, AccountId::new(1), AccountId::new(1), dec("1"))
                .unwrap_err();
            assert_eq!(err, TransferError::SelfTransfer(AccountId::new(1)));
        }
    }

    #[test]
    fn overdraft_is_allowed_by_default() {
        let engine = engine();
        engine
            .transfer_naive(AccountId::new(1), AccountId::new(2), dec("1000"))
            .unwrap();
        assert_eq!(balance(&engine, 1), dec("-900"));
        assert_eq!(balance(&engine, 2), dec("1050"));
    }

    #[test]
    fn rejecting_overdraft_leaves_both_balances_unchanged() {
        let engine = engine().with_overdraft(OverdraftPolicy::Reject);
        let err = engine
            .transfer_naive(AccountId::new(1), AccountId::new(2), dec("1000"))
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientFunds { .. }));
        assert_eq!(balance(&engine, 1), dec("100"));
        assert_eq!(balance(&engine, 2), dec("50"));

        // Locks were released on the error path.
        engine
            .transfer_naive(AccountId::new(1), AccountId::new(2), dec("100"))
            .unwrap();
    }

    #[test]
    fn balance_overflow_is_an_error_and_changes_nothing() {
        let store = Arc::new(AccountStore::in_memory(StoreOptions::default()));
        store
            .seed([
                (AccountId::new(1), dec("100")),
                (AccountId::new(2), Decimal::MAX),
            ])
            .unwrap();
        let engine = TransferEngine::new(store);

        for strategy in Strategy::ALL {
            let err = engine
                .transfer(strategy, AccountId::new(1), AccountId::new(2), dec("1"))
                .unwrap_err();
            assert!(matches!(err, TransferError::InvalidAmount(_)), "{strategy}: {err}");
        }
        assert_eq!(balance(&engine, 1), dec("100"));
        assert_eq!(balance(&engine, 2), Decimal::MAX);
        assert_eq!(engine.store().get(AccountId::new(2)).unwrap().version(), 0);
    }

    #[test]
    fn non_retryable_error_is_not_wrapped_by_retry() {
        let engine = engine();
        let err = engine
            .transfer_with_retry(AccountId::new(1), AccountId::new(42), dec("1"))
            .unwrap_err();
        assert_eq!(err, TransferError::NotFound(AccountId::new(42)));
    }
}
