//! Accounts module (records, transfer requests, locking and retry policies).
//!
//! Pure domain logic only: no IO, no locking, no persistence concerns.

pub mod account;
pub mod ordering;
pub mod retry;
pub mod transfer;

pub use account::{Account, Amount, OverdraftPolicy};
pub use ordering::{LockOrder, LockOrderingPolicy};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use transfer::{Strategy, TransferAttempt, TransferReceipt, TransferRequest, TransferState};
