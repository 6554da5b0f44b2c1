use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{Cents, Transaction, TransactionId, Transfer, TransferId, User, UserId};

use super::{LedgerStore, LedgerUnit, StoreError, StoreResult};

/// Where an injected storage failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    InsertTransaction,
    InsertTransfer,
    Commit,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    transactions: HashMap<TransactionId, Transaction>,
    transfers: HashMap<TransferId, Transfer>,
    last_sequence: i64,
}

impl MemoryState {
    fn user_by(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.users.values().find(|u| predicate(u)).cloned()
    }
}

/// In-process ledger store with the same unit semantics as the SQLite one.
///
/// A unit holds the store lock for its whole life and stages its writes;
/// they are published on commit and discarded on drop. Clones share state,
/// so a test can keep a handle for failure injection after handing the store
/// to a service.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
    armed: Arc<StdMutex<Option<FailPoint>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write at `point` fail with a storage error. One-shot.
    pub fn fail_next(&self, point: FailPoint) {
        *self.armed.lock().unwrap_or_else(|e| e.into_inner()) = Some(point);
    }
}

fn trip(armed: &StdMutex<Option<FailPoint>>, point: FailPoint) -> StoreResult<()> {
    let mut armed = armed.lock().unwrap_or_else(|e| e.into_inner());
    if *armed == Some(point) {
        *armed = None;
        return Err(StoreError::Storage(anyhow!(
            "injected storage failure at {:?}",
            point
        )));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for MemoryRepository {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        let state = Arc::clone(&self.state).lock_owned().await;
        let last_sequence = state.last_sequence;
        Ok(Box::new(MemoryUnit {
            state,
            armed: Arc::clone(&self.armed),
            users: HashMap::new(),
            transactions: Vec::new(),
            transfers: Vec::new(),
            last_sequence,
        }))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.user_by(|u| u.username == user.username).is_some() {
            return Err(StoreError::Duplicate { field: "username" });
        }
        if state.user_by(|u| u.email == user.email).is_some() {
            return Err(StoreError::Duplicate { field: "email" });
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.user_by(|u| u.username == username))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.user_by(|u| u.email == email))
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self.state.lock().await.users.values().cloned().collect();
        users.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(users)
    }

    async fn get_transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> StoreResult<(Vec<Transaction>, u64)> {
        let state = self.state.lock().await;
        let mut owned: Vec<&Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.user_id == user_id)
            .collect();
        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });

        let total = owned.len() as u64;
        let page = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn list_all_transactions(&self) -> StoreResult<Vec<Transaction>> {
        let mut all: Vec<Transaction> = self
            .state
            .lock()
            .await
            .transactions
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|tx| tx.sequence);
        Ok(all)
    }

    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>> {
        Ok(self.state.lock().await.transfers.get(&id).cloned())
    }

    async fn list_transfers(&self) -> StoreResult<Vec<Transfer>> {
        let mut all: Vec<Transfer> = self.state.lock().await.transfers.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

struct MemoryUnit {
    state: OwnedMutexGuard<MemoryState>,
    armed: Arc<StdMutex<Option<FailPoint>>>,
    users: HashMap<UserId, User>,
    transactions: Vec<Transaction>,
    transfers: Vec<Transfer>,
    last_sequence: i64,
}

impl MemoryUnit {
    fn current_user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id).or_else(|| self.state.users.get(&id))
    }

    fn current_transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|tx| tx.id == id)
            .or_else(|| self.state.transactions.get(&id))
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.current_user(id).cloned())
    }

    async fn get_transaction(&mut self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(self.current_transaction(id).cloned())
    }

    async fn update_user_balance(
        &mut self,
        id: UserId,
        new_balance: Cents,
        expected_version: i64,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut user = match self.current_user(id) {
            Some(user) if user.version == expected_version => user.clone(),
            _ => return Err(StoreError::Conflict),
        };
        if new_balance < 0 {
            return Err(StoreError::Storage(anyhow!(
                "balance of user {} would become negative",
                id
            )));
        }
        user.balance_cents = new_balance;
        user.version += 1;
        user.updated_at = updated_at;
        self.users.insert(id, user);
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &mut Transaction) -> StoreResult<()> {
        trip(&self.armed, FailPoint::InsertTransaction)?;
        if self.current_user(transaction.user_id).is_none() {
            return Err(StoreError::Storage(anyhow!(
                "transaction owner {} does not exist",
                transaction.user_id
            )));
        }
        if self.current_transaction(transaction.id).is_some() {
            return Err(StoreError::Storage(anyhow!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        self.last_sequence += 1;
        transaction.sequence = self.last_sequence;
        self.transactions.push(transaction.clone());
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> StoreResult<()> {
        trip(&self.armed, FailPoint::InsertTransfer)?;
        self.transfers.push(transfer.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        trip(&self.armed, FailPoint::Commit)?;
        let MemoryUnit {
            mut state,
            users,
            transactions,
            transfers,
            last_sequence,
            ..
        } = *self;
        state.users.extend(users);
        state
            .transactions
            .extend(transactions.into_iter().map(|tx| (tx.id, tx)));
        state
            .transfers
            .extend(transfers.into_iter().map(|t| (t.id, t)));
        state.last_sequence = last_sequence;
        Ok(())
    }
}
