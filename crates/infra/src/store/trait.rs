use std::sync::Arc;

use thiserror::Error;

use ledgerlock_accounts::Account;
use ledgerlock_core::{AccountId, ExpectedVersion, TransferError};

/// Persistence operation error.
///
/// These are storage failures, as opposed to transfer rule violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("account {0} not found")]
    NotFound(AccountId),

    /// Optimistic version check failed.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<PersistError> for TransferError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::NotFound(id) => TransferError::NotFound(id),
            PersistError::Conflict(msg) => TransferError::LockConflict(msg),
            PersistError::Unavailable(msg) => TransferError::Storage(msg),
        }
    }
}

/// Storage collaborator for account records.
///
/// Makes no storage assumptions: the in-memory implementation serves tests and
/// the simulator; a SQL backend would map `persist` onto a versioned UPDATE.
///
/// Implementations must:
/// - return `NotFound` from `load` for unknown ids
/// - reject `persist` with `Conflict` when `expected` does not match the stored version
/// - treat a missing record as creatable only under `ExpectedVersion::Any`
pub trait AccountPersistence: Send + Sync {
    /// Load the latest persisted record.
    fn load(&self, id: AccountId) -> Result<Account, PersistError>;

    /// Write `account` if the stored version matches `expected`.
    fn persist(&self, account: &Account, expected: ExpectedVersion) -> Result<(), PersistError>;

    /// All known account ids, ascending.
    fn ids(&self) -> Result<Vec<AccountId>, PersistError>;
}

impl<S> AccountPersistence for Arc<S>
where
    S: AccountPersistence + ?Sized,
{
    fn load(&self, id: AccountId) -> Result<Account, PersistError> {
        (**self).load(id)
    }

    fn persist(&self, account: &Account, expected: ExpectedVersion) -> Result<(), PersistError> {
        (**self).persist(account, expected)
    }

    fn ids(&self) -> Result<Vec<AccountId>, PersistError> {
        (**self).ids()
    }
}
