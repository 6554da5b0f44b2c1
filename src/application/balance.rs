use chrono::{DateTime, Utc};

use crate::domain::{Cents, UserId, now};
use crate::storage::LedgerUnit;

use super::AppError;

/// A committed-to-the-unit balance write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub user_id: UserId,
    pub previous_balance: Cents,
    pub new_balance: Cents,
    pub updated_at: DateTime<Utc>,
}

/// Apply a signed amount to a user's balance inside `unit`.
///
/// The balance is read fresh from the unit and written back with a
/// compare-and-swap on the user's version, so a concurrent writer that slipped
/// in between surfaces as `AppError::Conflict` rather than a lost update.
pub async fn apply_delta(
    unit: &mut dyn LedgerUnit,
    user_id: UserId,
    delta: Cents,
) -> Result<BalanceChange, AppError> {
    // Cents::MIN has no positive counterpart to report as the required amount
    if delta == 0 || delta == Cents::MIN {
        return Err(AppError::InvalidAmount(format!(
            "Balance change must be non-zero and within range, got {}",
            delta
        )));
    }

    let user = unit
        .get_user(user_id)
        .await?
        .ok_or(AppError::UserNotFound(user_id))?;

    let new_balance = user
        .balance_cents
        .checked_add(delta)
        .ok_or_else(|| AppError::InvalidAmount("Balance would overflow".to_string()))?;

    if new_balance < 0 {
        return Err(AppError::InsufficientFunds {
            user_id,
            balance: user.balance_cents,
            required: -delta,
        });
    }

    let updated_at = now();
    unit.update_user_balance(user_id, new_balance, user.version, updated_at)
        .await?;

    Ok(BalanceChange {
        user_id,
        previous_balance: user.balance_cents,
        new_balance,
        updated_at,
    })
}
