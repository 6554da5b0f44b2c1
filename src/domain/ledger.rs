use std::collections::{HashMap, HashSet};
use std::fmt;

use super::{Cents, Transaction, TransactionId, TransactionKind, Transfer, TransferId, User, UserId};

/// Sums over many amounts are kept wide: each balance fits in `Cents`, their
/// total across users need not.
pub type CentsTotal = i128;

/// Replay a user's transactions into a balance.
/// Balance = credits + incoming transfers - debits - outgoing transfers
pub fn compute_balance(user_id: UserId, transactions: &[Transaction]) -> CentsTotal {
    transactions
        .iter()
        .filter(|tx| tx.user_id == user_id)
        .map(|tx| CentsTotal::from(tx.signed_amount()))
        .sum()
}

/// Replay every transaction into a map of user_id -> balance.
/// Users without transactions are absent (balance = 0).
pub fn compute_all_balances(transactions: &[Transaction]) -> HashMap<UserId, CentsTotal> {
    let mut balances: HashMap<UserId, CentsTotal> = HashMap::new();
    for tx in transactions {
        *balances.entry(tx.user_id).or_insert(0) += CentsTotal::from(tx.signed_amount());
    }
    balances
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    BalanceMismatch {
        user_id: UserId,
        stored: Cents,
        replayed: CentsTotal,
    },
    NegativeBalance {
        user_id: UserId,
        balance: Cents,
    },
    OrphanTransaction {
        transaction_id: TransactionId,
        user_id: UserId,
    },
    BrokenTransfer {
        transfer_id: TransferId,
        reason: String,
    },
    DanglingReference {
        transaction_id: TransactionId,
    },
    UnsummarizedLeg {
        transaction_id: TransactionId,
        kind: TransactionKind,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::BalanceMismatch {
                user_id,
                stored,
                replayed,
            } => write!(
                f,
                "user {} stores balance {} but its transactions add up to {}",
                user_id, stored, replayed
            ),
            IntegrityIssue::NegativeBalance { user_id, balance } => {
                write!(f, "user {} has negative balance {}", user_id, balance)
            }
            IntegrityIssue::OrphanTransaction {
                transaction_id,
                user_id,
            } => write!(
                f,
                "transaction {} belongs to unknown user {}",
                transaction_id, user_id
            ),
            IntegrityIssue::BrokenTransfer {
                transfer_id,
                reason,
            } => write!(f, "transfer {}: {}", transfer_id, reason),
            IntegrityIssue::DanglingReference { transaction_id } => write!(
                f,
                "TRANSFER_IN {} does not reference a TRANSFER_OUT",
                transaction_id
            ),
            IntegrityIssue::UnsummarizedLeg {
                transaction_id,
                kind,
            } => write!(
                f,
                "{} {} is not part of any transfer",
                kind, transaction_id
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub user_count: usize,
    pub transaction_count: usize,
    pub transfer_count: usize,
    /// Sum of all stored balances
    pub total_balance: CentsTotal,
    /// Credits minus debits; transfers cancel out, so this must equal `total_balance`
    pub net_external_flow: CentsTotal,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty() && self.total_balance == self.net_external_flow
    }
}

/// Cross-check stored balances against the transaction trail and verify that
/// every transfer summary has exactly the two legs it claims.
pub fn build_integrity_report(
    users: &[User],
    transactions: &[Transaction],
    transfers: &[Transfer],
) -> IntegrityReport {
    let mut issues = Vec::new();
    let replayed = compute_all_balances(transactions);
    let known_users: HashSet<UserId> = users.iter().map(|u| u.id).collect();
    let by_id: HashMap<TransactionId, &Transaction> =
        transactions.iter().map(|tx| (tx.id, tx)).collect();

    for user in users {
        let replayed_balance = replayed.get(&user.id).copied().unwrap_or(0);
        if replayed_balance != CentsTotal::from(user.balance_cents) {
            issues.push(IntegrityIssue::BalanceMismatch {
                user_id: user.id,
                stored: user.balance_cents,
                replayed: replayed_balance,
            });
        }
        if user.balance_cents < 0 {
            issues.push(IntegrityIssue::NegativeBalance {
                user_id: user.id,
                balance: user.balance_cents,
            });
        }
    }

    for tx in transactions {
        if !known_users.contains(&tx.user_id) {
            issues.push(IntegrityIssue::OrphanTransaction {
                transaction_id: tx.id,
                user_id: tx.user_id,
            });
        }
        if tx.kind == TransactionKind::TransferIn {
            let references_out = tx
                .reference_transaction_id
                .and_then(|id| by_id.get(&id))
                .is_some_and(|origin| origin.kind == TransactionKind::TransferOut);
            if !references_out {
                issues.push(IntegrityIssue::DanglingReference {
                    transaction_id: tx.id,
                });
            }
        }
    }

    let mut summarized: HashSet<TransactionId> = HashSet::new();
    for transfer in transfers {
        summarized.insert(transfer.sender_transaction_id);
        summarized.insert(transfer.recipient_transaction_id);
        if let Err(reason) = check_transfer_legs(transfer, &by_id) {
            issues.push(IntegrityIssue::BrokenTransfer {
                transfer_id: transfer.id,
                reason,
            });
        }
    }

    for tx in transactions {
        if tx.kind.is_transfer_leg() && !summarized.contains(&tx.id) {
            issues.push(IntegrityIssue::UnsummarizedLeg {
                transaction_id: tx.id,
                kind: tx.kind,
            });
        }
    }

    let net_external_flow = transactions
        .iter()
        .filter(|tx| !tx.kind.is_transfer_leg())
        .map(|tx| CentsTotal::from(tx.signed_amount()))
        .sum();

    IntegrityReport {
        user_count: users.len(),
        transaction_count: transactions.len(),
        transfer_count: transfers.len(),
        total_balance: users
            .iter()
            .map(|u| CentsTotal::from(u.balance_cents))
            .sum(),
        net_external_flow,
        issues,
    }
}

fn check_transfer_legs(
    transfer: &Transfer,
    by_id: &HashMap<TransactionId, &Transaction>,
) -> Result<(), String> {
    let out_leg = by_id
        .get(&transfer.sender_transaction_id)
        .ok_or("sender leg is missing")?;
    let in_leg = by_id
        .get(&transfer.recipient_transaction_id)
        .ok_or("recipient leg is missing")?;

    if out_leg.kind != TransactionKind::TransferOut || out_leg.user_id != transfer.sender_id {
        return Err("sender leg is not a TRANSFER_OUT on the sender".into());
    }
    if in_leg.kind != TransactionKind::TransferIn || in_leg.user_id != transfer.recipient_id {
        return Err("recipient leg is not a TRANSFER_IN on the recipient".into());
    }
    if out_leg.amount_cents != transfer.amount_cents || in_leg.amount_cents != transfer.amount_cents
    {
        return Err("leg amounts differ from the transfer amount".into());
    }
    if out_leg.counterparty_user_id != Some(transfer.recipient_id)
        || in_leg.counterparty_user_id != Some(transfer.sender_id)
    {
        return Err("leg counterparties do not match the transfer parties".into());
    }
    if in_leg.reference_transaction_id != Some(out_leg.id) {
        return Err("recipient leg does not reference the sender leg".into());
    }
    Ok(())
}
