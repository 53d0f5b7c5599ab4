use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerlock_core::{AccountId, Entity, TransferError, TransferResult, ValueObject};

/// Non-negative transfer amount (exact decimal).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> TransferResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TransferError::invalid_amount(format!(
                "amount must not be negative (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl ValueObject for Amount {}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What a debit may do to a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverdraftPolicy {
    /// No floor: balances may go negative.
    #[default]
    Allow,
    /// Debits that would leave a negative balance fail with `InsufficientFunds`.
    Reject,
}

/// Account record.
///
/// `version` is bumped by the store on every commit and is what the
/// persistence layer checks writes against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    balance: Decimal,
    version: u64,
}

impl Account {
    /// A freshly opened account (version 0, never committed).
    pub fn open(id: AccountId, balance: Decimal) -> Self {
        Self {
            id,
            balance,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Copy of this record carrying the next version number.
    pub fn next_version(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Fails without touching the balance if the policy rejects it or the
    /// result does not fit in a `Decimal`.
    pub fn debit(&mut self, amount: Amount, policy: OverdraftPolicy) -> TransferResult<()> {
        let next = self
            .balance
            .checked_sub(amount.value())
            .ok_or_else(|| self.overflow(amount))?;
        if policy == OverdraftPolicy::Reject && next.is_sign_negative() && !next.is_zero() {
            return Err(TransferError::InsufficientFunds {
                account: self.id,
                balance: self.balance,
                requested: amount.value(),
            });
        }
        self.balance = next;
        Ok(())
    }

    pub fn credit(&mut self, amount: Amount) -> TransferResult<()> {
        self.balance = self
            .balance
            .checked_add(amount.value())
            .ok_or_else(|| self.overflow(amount))?;
        Ok(())
    }

    fn overflow(&self, amount: Amount) -> TransferError {
        TransferError::invalid_amount(format!(
            "balance overflow on account {}: {} by {amount}",
            self.id, self.balance
        ))
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn negative_amount_is_rejected() {
        let err = Amount::new(dec("-0.01")).unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount(_)));
        assert!(Amount::new(Decimal::ZERO).is_ok());
    }

    #[test]
    fn decimal_arithmetic_is_exact() {
        let mut a = Account::open(AccountId::new(1), dec("0.3"));
        a.debit(Amount::new(dec("0.1")).unwrap(), OverdraftPolicy::Allow)
            .unwrap();
        a.debit(Amount::new(dec("0.2")).unwrap(), OverdraftPolicy::Allow)
            .unwrap();
        assert_eq!(a.balance(), Decimal::ZERO);
    }

    #[test]
    fn allow_policy_lets_balance_go_negative() {
        let mut a = Account::open(AccountId::new(1), dec("100"));
        a.debit(Amount::new(dec("1000")).unwrap(), OverdraftPolicy::Allow)
            .unwrap();
        assert_eq!(a.balance(), dec("-900"));
    }

    #[test]
    fn reject_policy_keeps_balance_untouched() {
        let mut a = Account::open(AccountId::new(1), dec("100"));
        let err = a
            .debit(Amount::new(dec("100.01")).unwrap(), OverdraftPolicy::Reject)
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientFunds { .. }));
        assert_eq!(a.balance(), dec("100"));

        // Draining to exactly zero is fine.
        a.debit(Amount::new(dec("100")).unwrap(), OverdraftPolicy::Reject)
            .unwrap();
        assert_eq!(a.balance(), Decimal::ZERO);
    }

    #[test]
    fn overflowing_credit_and_debit_fail_without_change() {
        let mut full = Account::open(AccountId::new(1), Decimal::MAX);
        let err = full.credit(Amount::new(Decimal::ONE).unwrap()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount(_)));
        assert_eq!(full.balance(), Decimal::MAX);

        let mut empty = Account::open(AccountId::new(2), Decimal::MIN);
        let err = empty
            .debit(Amount::new(Decimal::ONE).unwrap(), OverdraftPolicy::Allow)
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount(_)));
        assert_eq!(empty.balance(), Decimal::MIN);
    }

    #[test]
    fn next_version_only_bumps_the_version() {
        let a = Account::open(AccountId::new(9), dec("5"));
        let b = a.next_version();
        assert_eq!(b.version(), 1);
        assert_eq!(b.balance(), a.balance());
        assert_eq!(b.id(), a.id());
    }
}
