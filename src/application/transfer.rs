use serde::Serialize;

use crate::domain::{Cents, TransactionId, TransactionKind, Transfer};
use crate::storage::LedgerUnit;

use super::balance::apply_delta;
use super::recorder::{NewTransaction, record};
use super::{AppError, TransferRequest};

/// Everything a completed transfer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub sender_transaction_id: TransactionId,
    pub recipient_transaction_id: TransactionId,
    pub sender_new_balance: Cents,
    pub recipient_new_balance: Cents,
}

/// Run the two-sided transfer inside `unit`.
///
/// Debit sender, credit recipient, append the TRANSFER_OUT and TRANSFER_IN
/// legs, then the summary row. Nothing is visible until the caller commits the
/// unit; any error returned here means the caller must drop it instead.
pub async fn execute(
    unit: &mut dyn LedgerUnit,
    request: &TransferRequest,
) -> Result<TransferResult, AppError> {
    request.validate()?;
    let amount = request.amount_cents;

    if unit.get_user(request.sender_id).await?.is_none() {
        return Err(AppError::SenderNotFound(request.sender_id));
    }
    if unit.get_user(request.recipient_id).await?.is_none() {
        return Err(AppError::RecipientNotFound(request.recipient_id));
    }

    let debit = apply_delta(unit, request.sender_id, -amount).await?;
    let credit = apply_delta(unit, request.recipient_id, amount).await?;

    let out_leg = record(
        unit,
        NewTransaction::new(request.sender_id, TransactionKind::TransferOut, amount)
            .with_description(request.description.clone())
            .with_counterparty(request.recipient_id),
    )
    .await?;

    let in_leg = record(
        unit,
        NewTransaction::new(request.recipient_id, TransactionKind::TransferIn, amount)
            .with_description(request.description.clone())
            .with_counterparty(request.sender_id)
            .with_reference(out_leg.id),
    )
    .await?;

    let transfer = Transfer::completed(
        request.sender_id,
        request.recipient_id,
        amount,
        out_leg.id,
        in_leg.id,
    )
    .with_description(request.description.clone());
    unit.insert_transfer(&transfer).await?;

    Ok(TransferResult {
        transfer,
        sender_transaction_id: out_leg.id,
        recipient_transaction_id: in_leg.id,
        sender_new_balance: debit.new_balance,
        recipient_new_balance: credit.new_balance,
    })
}
