use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId, now};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Money entering the wallet from outside the ledger
    Credit,
    /// Money leaving the wallet to outside the ledger
    Debit,
    /// Receiving leg of a transfer
    TransferIn,
    /// Sending leg of a transfer
    TransferOut,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 4] = [
        TransactionKind::Credit,
        TransactionKind::Debit,
        TransactionKind::TransferIn,
        TransactionKind::TransferOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "CREDIT",
            TransactionKind::Debit => "DEBIT",
            TransactionKind::TransferIn => "TRANSFER_IN",
            TransactionKind::TransferOut => "TRANSFER_OUT",
        }
    }

    /// True for kinds that increase the owner's balance.
    pub fn is_inflow(&self) -> bool {
        matches!(self, TransactionKind::Credit | TransactionKind::TransferIn)
    }

    /// Signed effect of an entry of this kind on the owner's balance.
    pub fn signed(&self, amount_cents: Cents) -> Cents {
        if self.is_inflow() {
            amount_cents
        } else {
            -amount_cents
        }
    }

    pub fn is_transfer_leg(&self) -> bool {
        matches!(
            self,
            TransactionKind::TransferIn | TransactionKind::TransferOut
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTransactionKind(pub String);

impl fmt::Display for UnknownTransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown transaction kind '{}' (expected CREDIT, DEBIT, TRANSFER_IN or TRANSFER_OUT)",
            self.0
        )
    }
}

impl std::error::Error for UnknownTransactionKind {}

impl FromStr for TransactionKind {
    type Err = UnknownTransactionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        TransactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownTransactionKind(s.to_string()))
    }
}

/// One balance-affecting event on one user's wallet. Append-only: once the
/// unit that created it commits, nothing in the system modifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Store-assigned, strictly increasing. Breaks ties between equal timestamps.
    pub sequence: i64,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Always positive; the kind carries the sign.
    pub amount_cents: Cents,
    pub description: Option<String>,
    /// The other side of a transfer leg
    pub counterparty_user_id: Option<UserId>,
    /// For TRANSFER_IN: the TRANSFER_OUT it was produced from
    pub reference_transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Sequence number is assigned by the store on insert.
    pub fn new(user_id: UserId, kind: TransactionKind, amount_cents: Cents) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            user_id,
            kind,
            amount_cents,
            description: None,
            counterparty_user_id: None,
            reference_transaction_id: None,
            created_at: now(),
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

    pub fn signed_amount(&self) -> Cents {
        self.kind.signed(self.amount_cents)
    }
}
