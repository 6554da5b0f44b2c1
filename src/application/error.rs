use thiserror::Error;

use crate::domain::{Cents, TransactionId, TransactionKind, TransferId, UserId};
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Sender not found: {0}")]
    SenderNotFound(UserId),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(UserId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("A user with {field} '{value}' already exists")]
    UserAlreadyExists { field: &'static str, value: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid pagination: limit {limit} exceeds the maximum of {max}")]
    InvalidPagination { limit: u32, max: u32 },

    #[error("Transactions of kind {0} cannot be posted directly")]
    InvalidKind(TransactionKind),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Cannot transfer from a user to themselves")]
    SelfTransfer,

    #[error("Insufficient funds for user {user_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        balance: Cents,
        required: Cents,
    },

    /// A concurrent writer got there first. Retried internally; callers only
    /// ever see `RetriesExhausted`.
    #[error("Concurrent update conflict")]
    Conflict,

    #[error("Gave up after {attempts} attempts due to concurrent updates")]
    RetriesExhausted { attempts: u32 },

    #[error("Storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AppError {
    /// Errors raised before any write was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidAmount(_)
                | AppError::InvalidInput(_)
                | AppError::InvalidPagination { .. }
                | AppError::InvalidKind(_)
                | AppError::SelfTransfer
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::UserNotFound(_)
                | AppError::SenderNotFound(_)
                | AppError::RecipientNotFound(_)
                | AppError::TransactionNotFound(_)
                | AppError::TransferNotFound(_)
        )
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => AppError::Conflict,
            // The offending value is filled in by the caller that knows it
            StoreError::Duplicate { field } => AppError::UserAlreadyExists {
                field,
                value: String::new(),
            },
            StoreError::Storage(inner) => AppError::Storage(inner),
        }
    }
}
