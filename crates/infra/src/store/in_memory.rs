use std::collections::BTreeMap;
use std::sync::RwLock;

use ledgerlock_accounts::Account;
use ledgerlock_core::{AccountId, Entity, ExpectedVersion};

use super::r#trait::{AccountPersistence, PersistError};

/// In-memory account table with optimistic version checks.
///
/// Intended for tests/dev. Not durable.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    rows: RwLock<BTreeMap<AccountId, Account>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountPersistence for InMemoryPersistence {
    fn load(&self, id: AccountId) -> Result<Account, PersistError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| PersistError::Unavailable("lock poisoned".to_string()))?;

        rows.get(&id).cloned().ok_or(PersistError::NotFound(id))
    }

    fn persist(&self, account: &Account, expected: ExpectedVersion) -> Result<(), PersistError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| PersistError::Unavailable("lock poisoned".to_string()))?;

        let id = *account.id();
        match (rows.get(&id), expected) {
            (None, ExpectedVersion::Exact(_)) => return Err(PersistError::NotFound(id)),
            (Some(current), _) if !expected.matches(current.version()) => {
                return Err(PersistError::Conflict(format!(
                    "account {id}: expected {expected:?}, found version {}",
                    current.version()
                )));
            }
            _ => {}
        }

        rows.insert(id, account.clone());
        Ok(())
    }

    fn ids(&self) -> Result<Vec<AccountId>, PersistError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| PersistError::Unavailable("lock poisoned".to_string()))?;

        Ok(rows.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn load_unknown_id_is_not_found() {
        let db = InMemoryPersistence::new();
        assert_eq!(
            db.load(AccountId::new(999)).unwrap_err(),
            PersistError::NotFound(AccountId::new(999))
        );
    }

    #[test]
    fn stale_write_is_a_conflict() {
        let db = InMemoryPersistence::new();
        let opened = Account::open(AccountId::new(1), Decimal::from(100));
        db.persist(&opened, ExpectedVersion::Any).unwrap();

        let v1 = opened.next_version();
        db.persist(&v1, ExpectedVersion::Exact(0)).unwrap();

        // A second writer still believing the row is at version 0.
        let err = db.persist(&v1.next_version(), ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, PersistError::Conflict(_)));
        assert_eq!(db.load(AccountId::new(1)).unwrap().version(), 1);
    }

    #[test]
    fn exact_write_to_missing_row_is_not_found() {
        let db = InMemoryPersistence::new();
        let ghost = Account::open(AccountId::new(5), Decimal::ONE);
        assert!(matches!(
            db.persist(&ghost, ExpectedVersion::Exact(0)),
            Err(PersistError::NotFound(_))
        ));
    }

    #[test]
    fn ids_are_ascending() {
        let db = InMemoryPersistence::new();
        for raw in [3u64, 1, 2] {
            db.persist(&Account::open(AccountId::new(raw), Decimal::ZERO), ExpectedVersion::Any)
                .unwrap();
        }
        assert_eq!(
            db.ids().unwrap(),
            vec![AccountId::new(1), AccountId::new(2), AccountId::new(3)]
        );
    }
}
