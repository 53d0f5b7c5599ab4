use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerlock_core::{AccountId, TransferError, TransferId, TransferResult};

use crate::account::Amount;

/// Concurrency-control strategy used for one transfer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Locks in caller order. Deadlocks on opposite-direction transfers.
    Naive,
    /// Locks in canonical order.
    Ordered,
    /// Naive acquisition wrapped in a retry loop.
    Retried,
    /// Explicit for-update locks in caller order.
    Pessimistic,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Naive,
        Strategy::Ordered,
        Strategy::Retried,
        Strategy::Pessimistic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Naive => "naive",
            Strategy::Ordered => "ordered",
            Strategy::Retried => "retried",
            Strategy::Pessimistic => "pessimistic",
        }
    }
}

impl core::fmt::Display for Strategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated transfer request (ephemeral, never persisted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

impl TransferRequest {
    /// Rejects self-transfers and negative amounts.
    pub fn new(from: AccountId, to: AccountId, amount: Decimal) -> TransferResult<Self> {
        if from == to {
            return Err(TransferError::SelfTransfer(from));
        }
        Ok(Self {
            from,
            to,
            amount: Amount::new(amount)?,
        })
    }
}

/// Lifecycle of a single transfer attempt.
///
/// ```text
/// Started -> LocksAcquired -> BalancesComputed -> Committed
///    |             |                 |
///    v             v                 v
///  Failed       Aborted           Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Started,
    LocksAcquired,
    BalancesComputed,
    Committed,
    /// Failed before every lock was held
    Failed,
    /// Failed after locks were held; nothing committed
    Aborted,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Committed | TransferState::Failed | TransferState::Aborted
        )
    }

    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Started, LocksAcquired)
                | (Started, Failed)
                | (LocksAcquired, BalancesComputed)
                | (LocksAcquired, Aborted)
                | (BalancesComputed, Committed)
                | (BalancesComputed, Aborted)
        )
    }
}

/// State tracker for one attempt of one transfer.
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    pub transfer_id: TransferId,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    state: TransferState,
}

impl TransferAttempt {
    pub fn start(transfer_id: TransferId, attempt: u32) -> Self {
        Self {
            transfer_id,
            attempt,
            started_at: Utc::now(),
            state: TransferState::Started,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn advance(&mut self, next: TransferState) -> TransferResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(TransferError::storage(format!(
                "illegal transition {:?} -> {next:?} for transfer {}",
                self.state, self.transfer_id
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Moves to the matching failure state: `Failed` before locks were held,
    /// `Aborted` after. No-op on an already terminal attempt.
    pub fn terminate(&mut self) -> TransferState {
        if !self.state.is_terminal() {
            self.state = match self.state {
                TransferState::Started => TransferState::Failed,
                _ => TransferState::Aborted,
            };
        }
        self.state
    }
}

/// Proof of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub strategy: Strategy,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    /// Attempts made, the successful one included.
    pub attempts: u32,
    pub committed_at: DateTime<Utc>,
}
