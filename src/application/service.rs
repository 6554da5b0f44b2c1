use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    Cents, IntegrityReport, Transaction, TransactionId, TransactionKind, Transfer, TransferId, User,
    UserId, build_integrity_report,
};
use crate::storage::{LedgerStore, MemoryRepository, SqliteRepository, StoreError};

use super::balance::apply_delta;
use super::locks::UserLocks;
use super::query::{self, TransactionPage};
use super::recorder::{NewTransaction, record};
use super::transfer::{self, TransferResult};
use super::{AppError, MoneyRequest, NewUser, PageRequest, TransferRequest};

/// Application service providing every wallet operation.
/// This is the primary interface for any client (CLI, API, tests).
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    locks: UserLocks,
    config: LedgerConfig,
}

/// Result of a deposit, withdrawal or direct posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementResult {
    pub transaction: Transaction,
    pub new_balance: Cents,
}

/// Current balance of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceInfo {
    pub user_id: UserId,
    pub balance: Cents,
    pub last_updated: DateTime<Utc>,
}

impl LedgerService {
    /// Create a service over any store.
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            locks: UserLocks::new(),
            config,
        }
    }

    /// Initialize a database at the given path, creating it if needed.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = SqliteRepository::init(&db_url, &config).await?;
        info!(path = database_path, "database initialized");
        Ok(Self::new(Arc::new(repo), config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = SqliteRepository::connect(&db_url, &config).await?;
        debug!(path = database_path, "database opened");
        Ok(Self::new(Arc::new(repo), config))
    }

    /// A service over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRepository::new()), LedgerConfig::default())
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // User operations
    // ========================

    /// Register a new user with a zero balance.
    pub async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        new_user.validate()?;

        if self
            .store
            .find_user_by_username(&new_user.username)
            .await?
            .is_some()
        {
            return Err(AppError::UserAlreadyExists {
                field: "username",
                value: new_user.username,
            });
        }
        if self.store.find_user_by_email(&new_user.email).await?.is_some() {
            return Err(AppError::UserAlreadyExists {
                field: "email",
                value: new_user.email,
            });
        }

        let mut user = User::new(
            new_user.username.clone(),
            new_user.email.clone(),
            &new_user.password,
        );
        if let Some(phone) = new_user.phone_number {
            user = user.with_phone_number(phone);
        }

        match self.store.insert_user(&user).await {
            Ok(()) => {}
            // Lost a registration race after the checks above
            Err(StoreError::Duplicate { field }) => {
                let value = if field == "email" {
                    new_user.email
                } else {
                    new_user.username
                };
                return Err(AppError::UserAlreadyExists { field, value });
            }
            Err(err) => return Err(err.into()),
        }

        info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, AppError> {
        self.store
            .get_user(id)
            .await?
            .ok_or(AppError::UserNotFound(id))
    }

    /// List all users, oldest first.
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.store.list_users().await?)
    }

    pub async fn get_balance(&self, id: UserId) -> Result<BalanceInfo, AppError> {
        let user = self.get_user(id).await?;
        Ok(BalanceInfo {
            user_id: user.id,
            balance: user.balance_cents,
            last_updated: user.updated_at,
        })
    }

    // ========================
    // Balance operations
    // ========================

    /// Add money to a wallet, recording a CREDIT.
    pub async fn deposit(&self, request: MoneyRequest) -> Result<MovementResult, AppError> {
        self.move_money(request, TransactionKind::Credit).await
    }

    /// Take money out of a wallet, recording a DEBIT.
    pub async fn withdraw(&self, request: MoneyRequest) -> Result<MovementResult, AppError> {
        self.move_money(request, TransactionKind::Debit).await
    }

    /// Post a CREDIT or DEBIT by kind. Transfer legs can only be produced by
    /// [`LedgerService::transfer`].
    pub async fn post_transaction(
        &self,
        kind: TransactionKind,
        request: MoneyRequest,
    ) -> Result<MovementResult, AppError> {
        if kind.is_transfer_leg() {
            return Err(AppError::InvalidKind(kind));
        }
        self.move_money(request, kind).await
    }

    async fn move_money(
        &self,
        request: MoneyRequest,
        kind: TransactionKind,
    ) -> Result<MovementResult, AppError> {
        request.validate()?;

        let _locks = self.locks.acquire(&[request.user_id]).await;
        let result = self
            .with_retry(kind.as_str(), || self.move_money_once(&request, kind))
            .await?;

        info!(
            user_id = %request.user_id,
            kind = %kind,
            amount_cents = request.amount_cents,
            new_balance = result.new_balance,
            transaction_id = %result.transaction.id,
            "balance updated"
        );
        Ok(result)
    }

    async fn move_money_once(
        &self,
        request: &MoneyRequest,
        kind: TransactionKind,
    ) -> Result<MovementResult, AppError> {
        let mut unit = self.store.begin().await?;

        let change = apply_delta(
            unit.as_mut(),
            request.user_id,
            kind.signed(request.amount_cents),
        )
        .await?;
        let transaction = record(
            unit.as_mut(),
            NewTransaction::new(request.user_id, kind, request.amount_cents)
                .with_description(request.description.clone()),
        )
        .await?;

        unit.commit().await?;
        Ok(MovementResult {
            transaction,
            new_balance: change.new_balance,
        })
    }

    // ========================
    // Transfer operations
    // ========================

    /// Move money between two users as one atomic unit.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferResult, AppError> {
        request.validate()?;

        let _locks = self
            .locks
            .acquire(&[request.sender_id, request.recipient_id])
            .await;
        let result = self
            .with_retry("TRANSFER", || self.transfer_once(&request))
            .await?;

        info!(
            transfer_id = %result.transfer.id,
            sender_id = %request.sender_id,
            recipient_id = %request.recipient_id,
            amount_cents = request.amount_cents,
            "transfer completed"
        );
        Ok(result)
    }

    async fn transfer_once(&self, request: &TransferRequest) -> Result<TransferResult, AppError> {
        let mut unit = self.store.begin().await?;
        let result = transfer::execute(unit.as_mut(), request).await?;
        unit.commit().await?;
        Ok(result)
    }

    // ========================
    // Queries
    // ========================

    /// A page of a user's transactions, newest first.
    pub async fn list_transactions(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<TransactionPage, AppError> {
        query::list_transactions(self.store.as_ref(), user_id, page).await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        query::get_transaction(self.store.as_ref(), id).await
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<Transfer, AppError> {
        query::get_transfer(self.store.as_ref(), id).await
    }

    // ========================
    // Integrity operations
    // ========================

    /// Replay the whole ledger and report anything that does not add up.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let users = self.store.list_users().await?;
        let transactions = self.store.list_all_transactions().await?;
        let transfers = self.store.list_transfers().await?;

        let report = build_integrity_report(&users, &transactions, &transfers);
        if !report.is_healthy() {
            warn!(issues = report.issues.len(), "ledger integrity check failed");
        }
        Ok(report)
    }

    /// Run `attempt` until it stops hitting write conflicts or the retry
    /// budget is spent. Each attempt opens and drops its own unit.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Err(AppError::Conflict) if attempts <= self.config.max_retries => {
                    debug!(operation, attempts, "write conflict, retrying");
                    tokio::time::sleep(self.config.backoff_for(attempts)).await;
                }
                Err(AppError::Conflict) => {
                    warn!(operation, attempts, "write conflict, giving up");
                    return Err(AppError::RetriesExhausted { attempts });
                }
                outcome => return outcome,
            }
        }
    }
}
