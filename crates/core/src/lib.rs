//! `ledgerlock-core`: shared primitives for the account ledger.
//!
//! This crate contains **pure** building blocks (no locking, no IO).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use entity::Entity;
pub use error::{TransferError, TransferResult};
pub use id::{AccountId, TransferId};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
