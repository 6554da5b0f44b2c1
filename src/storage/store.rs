use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Cents, Transaction, TransactionId, Transfer, TransferId, User, UserId};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The row changed since it was read, or the database was busy. The whole
    /// unit must be retried from scratch.
    #[error("Concurrent write conflict")]
    Conflict,

    #[error("A user with this {field} already exists")]
    Duplicate { field: &'static str },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable home of users, transactions and transfers.
///
/// Reads here are outside any unit and see only committed state. Every
/// balance-affecting write goes through a [`LedgerUnit`] obtained from
/// [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an atomic unit. Nothing written through it is visible to anyone
    /// else until [`LedgerUnit::commit`] succeeds; dropping it rolls back.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>>;

    /// Register a user. Fails with `Duplicate` on a taken username or email.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// All users, oldest first.
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    async fn get_transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    /// One page of a user's transactions, newest first, together with the
    /// user's total transaction count. Both come from the same snapshot.
    async fn list_transactions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> StoreResult<(Vec<Transaction>, u64)>;

    /// Every transaction in the ledger, in sequence order.
    async fn list_all_transactions(&self) -> StoreResult<Vec<Transaction>>;

    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>>;

    /// Every transfer, oldest first.
    async fn list_transfers(&self) -> StoreResult<Vec<Transfer>>;
}

/// One all-or-nothing unit of ledger writes.
#[async_trait]
pub trait LedgerUnit: Send {
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>>;

    async fn get_transaction(&mut self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    /// Compare-and-swap on the user's version. Fails with `Conflict` if the
    /// stored version is no longer `expected_version`.
    async fn update_user_balance(
        &mut self,
        id: UserId,
        new_balance: Cents,
        expected_version: i64,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Append a transaction, assigning its sequence number.
    async fn insert_transaction(&mut self, transaction: &mut Transaction) -> StoreResult<()>;

    async fn insert_transfer(&mut self, transfer: &Transfer) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
