//! Explicit inputs for every mutating or paginated operation. Each one is
//! checked by `validate` before the service touches storage.

use serde::{Deserialize, Serialize};

use crate::domain::{Cents, UserId};

use super::AppError;

/// Upper bound on a transaction page.
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone_number: Option<String>,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            phone_number: None,
        }
    }

    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().is_empty() {
            return Err(AppError::InvalidInput("Username must not be empty".into()));
        }
        let well_formed_email = self
            .email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !well_formed_email {
            return Err(AppError::InvalidInput(format!(
                "Invalid email address: {}",
                self.email
            )));
        }
        if self.password.is_empty() {
            return Err(AppError::InvalidInput("Password must not be empty".into()));
        }
        Ok(())
    }
}

/// A deposit or withdrawal. The direction comes from the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyRequest {
    pub user_id: UserId,
    pub amount_cents: Cents,
    pub description: Option<String>,
}

impl MoneyRequest {
    pub fn new(user_id: UserId, amount_cents: Cents) -> Self {
        Self {
            user_id,
            amount_cents,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        require_positive(self.amount_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub amount_cents: Cents,
    pub description: Option<String>,
}

impl TransferRequest {
    pub fn new(sender_id: UserId, recipient_id: UserId, amount_cents: Cents) -> Self {
        Self {
            sender_id,
            recipient_id,
            amount_cents,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        require_positive(self.amount_cents)?;
        if self.sender_id == self.recipient_id {
            return Err(AppError::SelfTransfer);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: MAX_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.limit > MAX_PAGE_LIMIT {
            return Err(AppError::InvalidPagination {
                limit: self.limit,
                max: MAX_PAGE_LIMIT,
            });
        }
        Ok(())
    }
}

fn require_positive(amount_cents: Cents) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidAmount(format!(
            "Amount must be positive, got {}",
            amount_cents
        )));
    }
    Ok(())
}
