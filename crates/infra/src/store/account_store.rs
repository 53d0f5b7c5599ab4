//! In-process account store with one exclusive lock per account.
//!
//! ## Locking model
//!
//! - Every account has a `LockSlot`: the committed record plus the id of the
//!   transfer currently holding it. Slots are materialised lazily from the
//!   persistence collaborator and live as long as the store.
//! - `acquire`/`acquire_for_update` block until the slot is free (or the
//!   configured timeout expires) and return an `AccountGuard`. Dropping the
//!   guard releases the lock on every exit path.
//! - Locks are not reentrant. A transfer asking again for a lock it holds
//!   waits on itself.
//! - With deadlock detection on, a requester whose wait would close a cycle in
//!   the wait-for graph fails with `DeadlockVictim` instead of blocking.
//!
//! ## Visibility
//!
//! Guards work on a private copy of the record. Nothing is visible to `get`,
//! `snapshot` or other transfers until `save`/`save_all` commits it; a guard
//! dropped without saving discards its changes.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use ledgerlock_accounts::Account;
use ledgerlock_core::{AccountId, ExpectedVersion, TransferError, TransferId, TransferResult};

use super::in_memory::InMemoryPersistence;
use super::r#trait::{AccountPersistence, PersistError};
use super::wait_for::WaitForGraph;

/// How a lock is requested. Both modes are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Default,
    /// Long-held write lock for a whole transaction (`SELECT ... FOR UPDATE`).
    ForUpdate,
}

/// Lock manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Bounded wait for `acquire`. `None` waits forever.
    pub lock_timeout: Option<Duration>,
    /// Bounded wait for `acquire_for_update`. Falls back to `lock_timeout`.
    pub for_update_timeout: Option<Duration>,
    /// Abort the requester that would close a wait-for cycle.
    pub deadlock_detection: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: None,
            for_update_timeout: None,
            deadlock_detection: true,
        }
    }
}

impl StoreOptions {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn with_for_update_timeout(mut self, timeout: Duration) -> Self {
        self.for_update_timeout = Some(timeout);
        self
    }

    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    fn timeout_for(&self, mode: LockMode) -> Option<Duration> {
        match mode {
            LockMode::Default => self.lock_timeout,
            LockMode::ForUpdate => self.for_update_timeout.or(self.lock_timeout),
        }
    }
}

#[derive(Debug)]
struct SlotState {
    holder: Option<TransferId>,
    committed: Account,
}

#[derive(Debug)]
struct LockSlot {
    state: Mutex<SlotState>,
    released: Condvar,
}

impl LockSlot {
    fn new(account: Account) -> Self {
        Self {
            state: Mutex::new(SlotState {
                holder: None,
                committed: account,
            }),
            released: Condvar::new(),
        }
    }

    fn lock_state(&self) -> TransferResult<MutexGuard<'_, SlotState>> {
        self.state
            .lock()
            .map_err(|_| TransferError::storage("account slot poisoned"))
    }
}

/// Exclusive handle on one account.
///
/// Reads and writes go to a working copy; `AccountStore::save` publishes it.
/// The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct AccountGuard {
    slot: Arc<LockSlot>,
    owner: TransferId,
    mode: LockMode,
    working: Account,
    acquired_at: Instant,
}

impl AccountGuard {
    pub fn account(&self) -> &Account {
        &self.working
    }

    pub fn account_mut(&mut self) -> &mut Account {
        &mut self.working
    }

    pub fn id(&self) -> AccountId {
        self.working.id_typed()
    }

    pub fn owner(&self) -> TransferId {
        self.owner
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        // Release even if another thread panicked while holding the slot mutex.
        let mut state = self
            .slot
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.holder == Some(self.owner) {
            state.holder = None;
        }
        drop(state);
        self.slot.released.notify_all();

        debug!(
            account = %self.id(),
            transfer_id = %self.owner(),
            mode = ?self.mode(),
            held_ms = self.held_for().as_millis() as u64,
            "lock released"
        );
    }
}

/// Keyed registry of accounts and their locks.
pub struct AccountStore<P = InMemoryPersistence> {
    persistence: P,
    slots: RwLock<HashMap<AccountId, Arc<LockSlot>>>,
    waits: WaitForGraph,
    // Writers: commits and creates. Readers: diagnostics snapshots.
    commit_gate: RwLock<()>,
    options: StoreOptions,
}

impl AccountStore<InMemoryPersistence> {
    pub fn in_memory(options: StoreOptions) -> Self {
        Self::new(InMemoryPersistence::new(), options)
    }
}

impl<P: AccountPersistence> AccountStore<P> {
    pub fn new(persistence: P, options: StoreOptions) -> Self {
        Self {
            persistence,
            slots: RwLock::new(HashMap::new()),
            waits: WaitForGraph::new(),
            commit_gate: RwLock::new(()),
            options,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Number of transfers currently blocked waiting for a lock.
    pub fn waiting_transfers(&self) -> usize {
        self.waits.waiting()
    }

    /// Opens a new account. Fails with `LockConflict` if the id is taken.
    pub fn create(&self, id: AccountId, opening_balance: Decimal) -> TransferResult<Account> {
        let _gate = self
            .commit_gate
            .write()
            .map_err(|_| TransferError::storage("commit gate poisoned"))?;

        match self.persistence.load(id) {
            Ok(_) => {
                return Err(TransferError::conflict(format!(
                    "account {id} already exists"
                )));
            }
            Err(PersistError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let account = Account::open(id, opening_balance);
        self.persistence.persist(&account, ExpectedVersion::Any)?;
        debug!(account = %id, balance = %opening_balance, "account created");
        Ok(account)
    }

    /// Creates every `(id, balance)` pair, stopping at the first failure.
    pub fn seed<I>(&self, accounts: I) -> TransferResult<()>
    where
        I: IntoIterator<Item = (AccountId, Decimal)>,
    {
        for (id, balance) in accounts {
            self.create(id, balance)?;
        }
        Ok(())
    }

    /// Committed snapshot of one account, without taking its lock.
    pub fn get(&self, id: AccountId) -> TransferResult<Account> {
        let _gate = self
            .commit_gate
            .read()
            .map_err(|_| TransferError::storage("commit gate poisoned"))?;
        self.committed(id)
    }

    /// Committed snapshot of every account, ascending by id.
    ///
    /// Never observes half of a pair commit.
    pub fn snapshot(&self) -> TransferResult<Vec<Account>> {
        let _gate = self
            .commit_gate
            .read()
            .map_err(|_| TransferError::storage("commit gate poisoned"))?;

        self.persistence
            .ids()?
            .into_iter()
            .map(|id| self.committed(id))
            .collect()
    }

    pub fn total_balance(&self) -> TransferResult<Decimal> {
        Ok(self.snapshot()?.iter().map(Account::balance).sum())
    }

    /// Blocks until `owner` holds the lock on `id`.
    pub fn acquire(&self, id: AccountId, owner: TransferId) -> TransferResult<AccountGuard> {
        self.lock(id, owner, LockMode::Default)
    }

    /// Same as `acquire`, requested as a for-update lock (own timeout if configured).
    pub fn acquire_for_update(
        &self,
        id: AccountId,
        owner: TransferId,
    ) -> TransferResult<AccountGuard> {
        self.lock(id, owner, LockMode::ForUpdate)
    }

    pub fn lock(
        &self,
        id: AccountId,
        owner: TransferId,
        mode: LockMode,
    ) -> TransferResult<AccountGuard> {
        let slot = self.slot(id)?;
        let result = self.wait_for_slot(&slot, id, owner, mode);
        self.waits.clear(owner);

        let working = result?;
        debug!(account = %id, transfer_id = %owner, mode = ?mode, "lock acquired");
        Ok(AccountGuard {
            slot,
            owner,
            mode,
            working,
            acquired_at: Instant::now(),
        })
    }

    fn wait_for_slot(
        &self,
        slot: &LockSlot,
        id: AccountId,
        owner: TransferId,
        mode: LockMode,
    ) -> TransferResult<Account> {
        let started = Instant::now();
        let deadline = self.options.timeout_for(mode).map(|t| started + t);
        let mut state = slot.lock_state()?;

        while let Some(holder) = state.holder {
            if self.options.deadlock_detection {
                if let Some(cycle) = self.waits.wait_on(owner, holder) {
                    warn!(
                        account = %id,
                        transfer_id = %owner,
                        holder = %holder,
                        cycle_len = cycle.len(),
                        "circular wait detected; aborting requester"
                    );
                    return Err(TransferError::DeadlockVictim {
                        transfer: owner,
                        account: id,
                    });
                }
            }

            state = match deadline {
                None => slot
                    .released
                    .wait(state)
                    .map_err(|_| TransferError::storage("account slot poisoned"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let waited_ms = started.elapsed().as_millis() as u64;
                        warn!(account = %id, transfer_id = %owner, waited_ms, "lock wait timed out");
                        return Err(TransferError::LockTimeout {
                            account: id,
                            waited_ms,
                        });
                    }
                    slot.released
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| TransferError::storage("account slot poisoned"))?
                        .0
                }
            };
        }

        state.holder = Some(owner);
        Ok(state.committed.clone())
    }

    /// Commits one guard's working copy.
    pub fn save(&self, guard: &mut AccountGuard) -> TransferResult<()> {
        self.save_all(&mut [guard])
    }

    /// Commits every guard's working copy, all or nothing.
    ///
    /// Each record is persisted with the next version against the version it
    /// was read at. If any write fails, the writes already made are rolled back
    /// and no slot is updated.
    pub fn save_all(&self, guards: &mut [&mut AccountGuard]) -> TransferResult<()> {
        let _gate = self
            .commit_gate
            .write()
            .map_err(|_| TransferError::storage("commit gate poisoned"))?;

        for guard in guards.iter() {
            let state = guard.slot.lock_state()?;
            if state.holder != Some(guard.owner()) {
                return Err(TransferError::storage(format!(
                    "transfer {} saved account {} without holding its lock",
                    guard.owner(),
                    guard.id()
                )));
            }
        }

        let mut written: Vec<&Account> = Vec::with_capacity(guards.len());
        let mut next_records = Vec::with_capacity(guards.len());
        for guard in guards.iter() {
            let next = guard.working.next_version();
            if let Err(err) = self
                .persistence
                .persist(&next, ExpectedVersion::Exact(guard.working.version()))
            {
                self.roll_back(&written)?;
                return Err(err.into());
            }
            written.push(&guard.working);
            next_records.push(next);
        }

        for (guard, next) in guards.iter_mut().zip(next_records) {
            guard.slot.lock_state()?.committed = next.clone();
            guard.working = next;
        }
        Ok(())
    }

    // `previous` holds the pre-commit records; their rows are now one version ahead.
    fn roll_back(&self, previous: &[&Account]) -> TransferResult<()> {
        for account in previous {
            self.persistence
                .persist(account, ExpectedVersion::Exact(account.version() + 1))
                .map_err(|e| {
                    TransferError::storage(format!(
                        "rollback of account {} failed: {e}",
                        account.id_typed()
                    ))
                })?;
        }
        Ok(())
    }

    fn committed(&self, id: AccountId) -> TransferResult<Account> {
        let slot = {
            let slots = self
                .slots
                .read()
                .map_err(|_| TransferError::storage("slot table poisoned"))?;
            slots.get(&id).cloned()
        };

        match slot {
            Some(slot) => Ok(slot.lock_state()?.committed.clone()),
            None => Ok(self.persistence.load(id)?),
        }
    }

    fn slot(&self, id: AccountId) -> TransferResult<Arc<LockSlot>> {
        {
            let slots = self
                .slots
                .read()
                .map_err(|_| TransferError::storage("slot table poisoned"))?;
            if let Some(slot) = slots.get(&id) {
                return Ok(slot.clone());
            }
        }

        let account = self.persistence.load(id)?;
        let mut slots = self
            .slots
            .write()
            .map_err(|_| TransferError::storage("slot table poisoned"))?;
        Ok(slots
            .entry(id)
            .or_insert_with(|| Arc::new(LockSlot::new(account)))
            .clone())
    }
}
