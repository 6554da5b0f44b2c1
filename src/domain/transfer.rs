use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, TransactionId, UserId, now};

pub type TransferId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status '{}'", other)),
        }
    }
}

/// Summary of one transfer between two users. It is written last, in the same
/// unit as both balance changes and both transfer legs, and never changes
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    /// Balance decreases
    pub sender_id: UserId,
    /// Balance increases
    pub recipient_id: UserId,
    /// Always positive
    pub amount_cents: Cents,
    pub description: Option<String>,
    pub status: TransferStatus,
    /// The TRANSFER_OUT leg on the sender
    pub sender_transaction_id: TransactionId,
    /// The TRANSFER_IN leg on the recipient
    pub recipient_transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Build the summary for a pair of legs that have already been recorded.
    pub fn completed(
        sender_id: UserId,
        recipient_id: UserId,
        amount_cents: Cents,
        sender_transaction_id: TransactionId,
        recipient_transaction_id: TransactionId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            amount_cents,
            description: None,
            status: TransferStatus::Completed,
            sender_transaction_id,
            recipient_transaction_id,
            created_at: now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// True if the given user is either party.
    pub fn involves(&self, user_id: UserId) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }
}
