//! Infrastructure layer: account storage, lock manager, transfer engine, config.

pub mod config;
pub mod engine;
pub mod simulator;
pub mod store;


pub use config::LedgerConfig;
pub use engine::TransferEngine;
pub use simulator::{DeadlockSimulator, SimulationConfig, SimulationReport};
pub use store::{
    AccountGuard, AccountPersistence, AccountStore, InMemoryPersistence, LockMode, PersistError,
    StoreOptions,
};
