//! One-shot import of the unencrypted SQLite store written by earlier releases.

use chrono::NaiveDate;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::MigrationError;
use crate::store::{Account, Category, SealedStore, Transaction};

const SIDE_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Everything read from the legacy file, parsed and ready to insert.
#[derive(Debug, Default)]
pub struct LegacySnapshot {
    pub accounts: Vec<Account>,
    pub categories: Vec<Category>,
    pub transactions: Vec<Transaction>,
}

impl LegacySnapshot {
    pub fn row_count(&self) -> usize {
        self.accounts.len() + self.categories.len() + self.transactions.len()
    }
}

pub struct LegacyMigrator {
    path: PathBuf,
}

impl LegacyMigrator {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read every legacy row without modifying the file.
    pub fn read(&self) -> Result<LegacySnapshot, MigrationError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let mut stmt = conn.prepare("SELECT id, name FROM Account ORDER BY id")?;
        let accounts = stmt
            .query_map([], |row| {
                Ok(Account {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT id, name, budget, color FROM Category ORDER BY id")?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    budget: row.get(2)?,
                    color: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, amount, date, account_id, category_id
             FROM \"Transaction\" ORDER BY id",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut transactions = Vec::with_capacity(raw.len());
        for (id, name, amount, date, account_id, category_id) in raw {
            let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                MigrationError::InvalidRow {
                    table: "Transaction",
                    id,
                    reason: format!("date {date:?}: {e}"),
                }
            })?;
            transactions.push(Transaction {
                id,
                name,
                amount,
                date,
                account_id,
                category_id,
            });
        }

        debug!(
            accounts = accounts.len(),
            categories = categories.len(),
            transactions = transactions.len(),
            "legacy rows read"
        );
        Ok(LegacySnapshot {
            accounts,
            categories,
            transactions,
        })
    }

    /// Copy every legacy row into `store` in one store transaction, keeping
    /// ids. Rows whose id is already present are replaced. Nothing is
    /// committed unless every row is accepted. Returns the number of rows.
    pub fn migrate_to(&self, store: &SealedStore) -> Result<usize, MigrationError> {
        let snapshot = self.read()?;
        let count = snapshot.row_count();
        store.transaction(|tables| -> Result<(), MigrationError> {
            for account in snapshot.accounts {
                tables.upsert_account(account)?;
            }
            for category in snapshot.categories {
                tables.upsert_category(category)?;
            }
            for transaction in snapshot.transactions {
                tables.upsert_transaction(transaction)?;
            }
            Ok(())
        })?;
        info!(rows = count, "legacy database migrated");
        Ok(count)
    }

    /// Remove the legacy file and its SQLite side files. Missing files are fine.
    pub fn delete(&self) -> Result<(), MigrationError> {
        crate::store::sealed::remove_if_exists(&self.path)?;
        for suffix in SIDE_SUFFIXES {
            let mut side = self.path.clone().into_os_string();
            side.push(suffix);
            crate::store::sealed::remove_if_exists(Path::new(&side))?;
        }
        info!(path = %self.path.display(), "legacy database deleted");
        Ok(())
    }
}
