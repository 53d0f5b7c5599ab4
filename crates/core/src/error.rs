//! Transfer error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::{AccountId, TransferId};

/// Result type used across the ledger.
pub type TransferResult<T> = Result<T, TransferError>;

/// Failure of a transfer call.
///
/// Every variant means the transfer did **not** happen: no balance was
/// changed. Only an `Ok` receipt reports a committed transfer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Unknown account id. Never retried.
    #[error("account {0} not found")]
    NotFound(AccountId),

    /// Source and destination are the same account; rejected before any lock is taken.
    #[error("self-transfer rejected for account {0}")]
    SelfTransfer(AccountId),

    /// Negative (or otherwise unusable) amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Only raised when the overdraft policy rejects negative balances.
    #[error("insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Decimal,
        requested: Decimal,
    },

    /// The lock manager broke a circular wait by aborting this transfer.
    #[error("transfer {transfer} chosen as deadlock victim while waiting for account {account}")]
    DeadlockVictim {
        transfer: TransferId,
        account: AccountId,
    },

    /// A write raced with another writer (stale version, duplicate create).
    #[error("lock conflict: {0}")]
    LockConflict(String),

    /// Bounded lock wait expired.
    #[error("timed out after {waited_ms}ms waiting for lock on account {account}")]
    LockTimeout { account: AccountId, waited_ms: u64 },

    /// The retrying strategy gave up; `last` is the final attempt's error, unchanged.
    #[error("retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<TransferError>,
    },

    /// The backing storage is unusable (poisoned lock, unavailable backend).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl TransferError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::LockConflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Lock conflicts and deadlock victims are safe to retry from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::DeadlockVictim { .. } | TransferError::LockConflict(_)
        )
    }

    /// Short machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::NotFound(_) => "not_found",
            TransferError::SelfTransfer(_) => "self_transfer",
            TransferError::InvalidAmount(_) => "invalid_amount",
            TransferError::InvalidId(_) => "invalid_id",
            TransferError::InsufficientFunds { .. } => "insufficient_funds",
            TransferError::DeadlockVictim { .. } => "deadlock_victim",
            TransferError::LockConflict(_) => "lock_conflict",
            TransferError::LockTimeout { .. } => "lock_timeout",
            TransferError::RetryExhausted { .. } => "retry_exhausted",
            TransferError::Storage(_) => "storage",
        }
    }
}
