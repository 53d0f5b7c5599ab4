//! Account storage boundary.
//!
//! `AccountPersistence` is the replaceable storage collaborator (load/persist).
//! `AccountStore` sits on top of it and owns the per-account locks that
//! transfers acquire.

pub mod account_store;
pub mod in_memory;
pub mod r#trait;
pub mod wait_for;

pub use account_store::{AccountGuard, AccountStore, LockMode, StoreOptions};
pub use in_memory::InMemoryPersistence;
pub use r#trait::{AccountPersistence, PersistError};
pub use wait_for::WaitForGraph;
