//! Row models held by the sealed store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::StoreError;

/// Reserved id of the account seeded into every new store.
pub const DEFAULT_ACCOUNT_ID: i64 = 0;
pub const DEFAULT_ACCOUNT_NAME: &str = "DefaultAccount";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// Unique across the store.
    pub name: String,
}

impl Account {
    pub fn default_account() -> Self {
        Self {
            id: DEFAULT_ACCOUNT_ID,
            name: DEFAULT_ACCOUNT_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// Monthly budget in minor currency units.
    pub budget: Option<i64>,
    /// ARGB color as stored by the legacy app.
    pub color: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub name: String,
    /// Signed amount in minor currency units.
    pub amount: i64,
    pub date: NaiveDate,
    pub account_id: i64,
    pub category_id: Option<i64>,
}

/// Whole contents of a store. Serialized as the sealed payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub accounts: BTreeMap<i64, Account>,
    #[serde(default)]
    pub categories: BTreeMap<i64, Category>,
    #[serde(default)]
    pub transactions: BTreeMap<i64, Transaction>,
}

impl Tables {
    pub fn row_count(&self) -> usize {
        self.accounts.len() + self.categories.len() + self.transactions.len()
    }

    /// Insert or replace by id.
    pub fn upsert_account(&mut self, account: Account) -> Result<(), StoreError> {
        if let Some(other) = self
            .accounts
            .values()
            .find(|a| a.name == account.name && a.id != account.id)
        {
            return Err(StoreError::Constraint(format!(
                "account name {:?} already used by id {}",
                account.name, other.id
            )));
        }
        self.accounts.insert(account.id, account);
        Ok(())
    }

    pub fn upsert_category(&mut self, category: Category) -> Result<(), StoreError> {
        self.categories.insert(category.id, category);
        Ok(())
    }

    /// Insert or replace by id. The referenced account (and category, if any)
    /// must already exist.
    pub fn upsert_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError> {
        if !self.accounts.contains_key(&transaction.account_id) {
            return Err(StoreError::Constraint(format!(
                "transaction {} references missing account {}",
                transaction.id, transaction.account_id
            )));
        }
        if let Some(category_id) = transaction.category_id {
            if !self.categories.contains_key(&category_id) {
                return Err(StoreError::Constraint(format!(
                    "transaction {} references missing category {}",
                    transaction.id, category_id
                )));
            }
        }
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: i64, account_id: i64, category_id: Option<i64>) -> Transaction {
        Transaction {
            id,
            name: format!("tx-{id}"),
            amount: -1250,
            date: NaiveDate::from_ymd_opt(2019, 3, 14).unwrap(),
            account_id,
            category_id,
        }
    }

    #[test]
    fn account_names_are_unique() {
        let mut tables = Tables::default();
        tables.upsert_account(Account::default_account()).unwrap();
        let dup = Account {
            id: 7,
            name: DEFAULT_ACCOUNT_NAME.to_string(),
        };
        assert!(matches!(
            tables.upsert_account(dup),
            Err(StoreError::Constraint(_))
        ));
        // Replacing the same id under the same name is fine.
        tables.upsert_account(Account::default_account()).unwrap();
        assert_eq!(tables.accounts.len(), 1);
    }

    #[test]
    fn transactions_require_existing_references() {
        let mut tables = Tables::default();
        assert!(tables.upsert_transaction(tx(1, 0, None)).is_err());
        tables.upsert_account(Account::default_account()).unwrap();
        tables.upsert_transaction(tx(1, 0, None)).unwrap();
        assert!(tables.upsert_transaction(tx(2, 0, Some(3))).is_err());
        tables
            .upsert_category(Category {
                id: 3,
                name: "Food".into(),
                budget: Some(20000),
                color: None,
            })
            .unwrap();
        tables.upsert_transaction(tx(2, 0, Some(3))).unwrap();
        assert_eq!(tables.row_count(), 4);
    }

    #[test]
    fn payload_survives_json() {
        let mut tables = Tables::default();
        tables.upsert_account(Account::default_account()).unwrap();
        tables.upsert_transaction(tx(9, 0, None)).unwrap();
        let json = serde_json::to_vec(&tables).unwrap();
        let back: Tables = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, tables);
    }
}
