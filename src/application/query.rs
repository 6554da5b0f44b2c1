use serde::Serialize;

use crate::domain::{Transaction, TransactionId, Transfer, TransferId, UserId};
use crate::storage::LedgerStore;

use super::{AppError, PageRequest};

/// One page of a user's history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    /// Count of all the user's transactions, independent of the page bounds
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
}

impl TransactionPage {
    pub fn has_more(&self) -> bool {
        u64::from(self.offset) + (self.items.len() as u64) < self.total
    }
}

pub async fn list_transactions(
    store: &dyn LedgerStore,
    user_id: UserId,
    page: PageRequest,
) -> Result<TransactionPage, AppError> {
    page.validate()?;
    if store.get_user(user_id).await?.is_none() {
        return Err(AppError::UserNotFound(user_id));
    }

    let (items, total) = store
        .list_transactions(user_id, page.offset, page.limit)
        .await?;
    Ok(TransactionPage {
        items,
        total,
        offset: page.offset,
        limit: page.limit,
    })
}

pub async fn get_transaction(
    store: &dyn LedgerStore,
    id: TransactionId,
) -> Result<Transaction, AppError> {
    store
        .get_transaction(id)
        .await?
        .ok_or(AppError::TransactionNotFound(id))
}

pub async fn get_transfer(store: &dyn LedgerStore, id: TransferId) -> Result<Transfer, AppError> {
    store
        .get_transfer(id)
        .await?
        .ok_or(AppError::TransferNotFound(id))
}
