use crate::domain::{Cents, Transaction, TransactionId, TransactionKind, UserId};
use crate::storage::LedgerUnit;

use super::AppError;

/// Everything needed to append one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount_cents: Cents,
    pub description: Option<String>,
    pub counterparty_user_id: Option<UserId>,
    pub reference_transaction_id: Option<TransactionId>,
}

impl NewTransaction {
    pub fn new(user_id: UserId, kind: TransactionKind, amount_cents: Cents) -> Self {
        Self {
            user_id,
            kind,
            amount_cents,
            description: None,
            counterparty_user_id: None,
            reference_transaction_id: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_counterparty(mut self, counterparty: UserId) -> Self {
        self.counterparty_user_id = Some(counterparty);
        self
    }

    pub fn with_reference(mut self, reference: TransactionId) -> Self {
        self.reference_transaction_id = Some(reference);
        self
    }
}

/// Append one immutable transaction inside `unit`.
///
/// Only structural checks happen here: a positive amount and that every id
/// the entry points at exists. Balance rules belong to the mutator.
pub async fn record(
    unit: &mut dyn LedgerUnit,
    entry: NewTransaction,
) -> Result<Transaction, AppError> {
    if entry.amount_cents <= 0 {
        return Err(AppError::InvalidAmount(format!(
            "Transaction amount must be positive, got {}",
            entry.amount_cents
        )));
    }

    if unit.get_user(entry.user_id).await?.is_none() {
        return Err(AppError::UserNotFound(entry.user_id));
    }

    if let Some(counterparty) = entry.counterparty_user_id {
        if unit.get_user(counterparty).await?.is_none() {
            return Err(AppError::InvalidReference(format!(
                "counterparty user {} does not exist",
                counterparty
            )));
        }
    }

    if let Some(reference) = entry.reference_transaction_id {
        if entry.kind != TransactionKind::TransferIn {
            return Err(AppError::InvalidReference(format!(
                "only TRANSFER_IN entries may reference another transaction, not {}",
                entry.kind
            )));
        }
        let origin = unit
            .get_transaction(reference)
            .await?
            .ok_or_else(|| {
                AppError::InvalidReference(format!("transaction {} does not exist", reference))
            })?;
        if origin.kind != TransactionKind::TransferOut {
            return Err(AppError::InvalidReference(format!(
                "transaction {} is {}, expected TRANSFER_OUT",
                reference, origin.kind
            )));
        }
    }

    let mut transaction = Transaction::new(entry.user_id, entry.kind, entry.amount_cents)
        .with_description(entry.description);
    transaction.counterparty_user_id = entry.counterparty_user_id;
    transaction.reference_transaction_id = entry.reference_transaction_id;

    unit.insert_transaction(&mut transaction).await?;
    tracing::debug!(
        transaction_id = %transaction.id,
        user_id = %transaction.user_id,
        kind = %transaction.kind,
        sequence = transaction.sequence,
        "transaction recorded"
    );
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::domain::User;
    use crate::storage::{LedgerStore, MemoryRepository};

    async fn store_with_users() -> (Arc<MemoryRepository>, User, User) {
        let store = Arc::new(MemoryRepository::new());
        let alice = User::new("alice", "alice@example.com", "pw");
        let bob = User::new("bob", "bob@example.com", "pw");
        store.insert_user(&alice).await.unwrap();
        store.insert_user(&bob).await.unwrap();
        (store, alice, bob)
    }

    #[tokio::test]
    async fn test_record_assigns_increasing_sequence() {
        let (store, alice, _) = store_with_users().await;
        let mut unit = store.begin().await.unwrap();

        let first = record(
            unit.as_mut(),
            NewTransaction::new(alice.id, TransactionKind::Credit, 100)
                .with_description(Some("salary".into())),
        )
        .await
        .unwrap();
        let second = record(
            unit.as_mut(),
            NewTransaction::new(alice.id, TransactionKind::Debit, 50),
        )
        .await
        .unwrap();
        unit.commit().await.unwrap();

        assert!(second.sequence > first.sequence);
        assert_eq!(first.description.as_deref(), Some("salary"));
        assert_eq!(store.get_transaction(first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let (store, alice, _) = store_with_users().await;
        let mut unit = store.begin().await.unwrap();
        let result = record(
            unit.as_mut(),
            NewTransaction::new(alice.id, TransactionKind::Credit, 0),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_rejects_unknown_counterparty() {
        let (store, alice, _) = store_with_users().await;
        let mut unit = store.begin().await.unwrap();
        let result = record(
            unit.as_mut(),
            NewTransaction::new(alice.id, TransactionKind::TransferOut, 10)
                .with_counterparty(Uuid::new_v4()),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn test_transfer_in_must_reference_transfer_out() {
        let (store, alice, bob) = store_with_users().await;
        let mut unit = store.begin().await.unwrap();

        let credit = record(
            unit.as_mut(),
            NewTransaction::new(alice.id, TransactionKind::Credit, 10),
        )
        .await
        .unwrap();
        let wrong = record(
            unit.as_mut(),
            NewTransaction::new(bob.id, TransactionKind::TransferIn, 10)
                .with_counterparty(alice.id)
                .with_reference(credit.id),
        )
        .await;
        assert!(matches!(wrong, Err(AppError::InvalidReference(_))));

        let out_leg = record(
            unit.as_mut(),
            NewTransaction::new(alice.id, TransactionKind::TransferOut, 10)
                .with_counterparty(bob.id),
        )
        .await
        .unwrap();
        let in_leg = record(
            unit.as_mut(),
            NewTransaction::new(bob.id, TransactionKind::TransferIn, 10)
                .with_counterparty(alice.id)
                .with_reference(out_leg.id),
        )
        .await
        .unwrap();
        assert_eq!(in_leg.reference_transaction_id, Some(out_leg.id));
    }

    #[tokio::test]
    async fn test_reference_only_on_transfer_in() {
        let (store, alice, _) = store_with_users().await;
        let mut unit = store.begin().await.unwrap();
        let result = record(
            unit.as_mut(),
            NewTransaction::new(alice.id, TransactionKind::Debit, 10).with_reference(Uuid::new_v4()),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidReference(_))));
    }
}
