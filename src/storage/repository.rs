use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    Cents, Transaction, TransactionId, TransactionKind, Transfer, TransferId, TransferStatus, User,
    UserId,
};

use super::{LedgerStore, LedgerUnit, MIGRATION_001_INITIAL, StoreError, StoreResult};

// Primary result codes; sqlx reports the extended code, whose low byte is the primary one.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

const USER_COLUMNS: &str = "id, username, email, password_hash, phone_number, balance_cents, version, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, sequence, user_id, kind, amount_cents, description, counterparty_user_id, reference_transaction_id, created_at";
const TRANSFER_COLUMNS: &str = "id, sender_id, recipient_id, amount_cents, description, status, sender_transaction_id, recipient_transaction_id, created_at";

/// SQLite-backed ledger store.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL (`sqlite:path` or `sqlite:path?mode=rwc`).
    pub async fn connect(database_url: &str, config: &LedgerConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run more than once.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str, config: &LedgerConfig) -> Result<Self> {
        let repo = Self::connect(database_url, config).await?;
        repo.migrate().await?;
        Ok(repo)
    }
}

#[async_trait]
impl LedgerStore for SqliteRepository {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        // Take the write lock up front so concurrent writers wait out the busy
        // timeout instead of failing on a stale read snapshot
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .store_context("Failed to begin transaction")?;
        Ok(Box::new(SqliteUnit { tx }))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, phone_number, balance_cents, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone_number)
        .bind(user.balance_cents)
        .bind(user.version)
        .bind(encode_timestamp(&user.created_at))
        .bind(encode_timestamp(&user.updated_at))
        .execute(&self.pool)
        .await
        .store_context("Failed to save user")?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        fetch_user(&self.pool, id).await
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .store_context("Failed to fetch user by username")?;

        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .store_context("Failed to fetch user by email")?;

        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at, username",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .store_context("Failed to list users")?;

        Ok(rows.iter().map(row_to_user).collect::<Result<_>>()?)
    }

    async fn get_transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        fetch_transaction(&self.pool, id).await
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> StoreResult<(Vec<Transaction>, u64)> {
        // One read transaction so the page and the total agree
        let mut tx = self
            .pool
            .begin()
            .await
            .store_context("Failed to begin read transaction")?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM transactions WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .store_context("Failed to count transactions")?
            .get("count");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE user_id = ?
            ORDER BY created_at DESC, sequence DESC
            LIMIT ? OFFSET ?
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(user_id.to_string())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&mut *tx)
        .await
        .store_context("Failed to list transactions")?;

        tx.commit()
            .await
            .store_context("Failed to close read transaction")?;

        let items = rows
            .iter()
            .map(row_to_transaction)
            .collect::<Result<Vec<_>>>()?;
        Ok((items, u64::try_from(total).unwrap_or_default()))
    }

    async fn list_all_transactions(&self) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY sequence",
            TRANSACTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .store_context("Failed to list transactions")?;

        Ok(rows.iter().map(row_to_transaction).collect::<Result<_>>()?)
    }

    async fn get_transfer(&self, id: TransferId) -> StoreResult<Option<Transfer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers WHERE id = ?",
            TRANSFER_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .store_context("Failed to fetch transfer")?;

        Ok(row.as_ref().map(row_to_transfer).transpose()?)
    }

    async fn list_transfers(&self) -> StoreResult<Vec<Transfer>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transfers ORDER BY created_at, id",
            TRANSFER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .store_context("Failed to list transfers")?;

        Ok(rows.iter().map(row_to_transfer).collect::<Result<_>>()?)
    }
}

/// A database transaction. sqlx rolls it back when dropped uncommitted.
struct SqliteUnit {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl LedgerUnit for SqliteUnit {
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        fetch_user(&mut *self.tx, id).await
    }

    async fn get_transaction(&mut self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        fetch_transaction(&mut *self.tx, id).await
    }

    async fn update_user_balance(
        &mut self,
        id: UserId,
        new_balance: Cents,
        expected_version: i64,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET balance_cents = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(new_balance)
        .bind(encode_timestamp(&updated_at))
        .bind(id.to_string())
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .store_context("Failed to update balance")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &mut Transaction) -> StoreResult<()> {
        let sequence: i64 = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *self.tx)
        .await
        .store_context("Failed to get next sequence number")?
        .get("value");
        transaction.sequence = sequence;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, user_id, kind, amount_cents, description, counterparty_user_id, reference_transaction_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.sequence)
        .bind(transaction.user_id.to_string())
        .bind(transaction.kind.as_str())
        .bind(transaction.amount_cents)
        .bind(&transaction.description)
        .bind(transaction.counterparty_user_id.map(|id| id.to_string()))
        .bind(transaction.reference_transaction_id.map(|id| id.to_string()))
        .bind(encode_timestamp(&transaction.created_at))
        .execute(&mut *self.tx)
        .await
        .store_context("Failed to save transaction")?;
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfers (id, sender_id, recipient_id, amount_cents, description, status, sender_transaction_id, recipient_transaction_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer.id.to_string())
        .bind(transfer.sender_id.to_string())
        .bind(transfer.recipient_id.to_string())
        .bind(transfer.amount_cents)
        .bind(&transfer.description)
        .bind(transfer.status.as_str())
        .bind(transfer.sender_transaction_id.to_string())
        .bind(transfer.recipient_transaction_id.to_string())
        .bind(encode_timestamp(&transfer.created_at))
        .execute(&mut *self.tx)
        .await
        .store_context("Failed to save transfer")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .store_context("Failed to commit transaction")
    }
}

async fn fetch_user<'e, E>(executor: E, id: UserId) -> StoreResult<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(executor)
        .await
        .store_context("Failed to fetch user")?;

    Ok(row.as_ref().map(row_to_user).transpose()?)
}

async fn fetch_transaction<'e, E>(executor: E, id: TransactionId) -> StoreResult<Option<Transaction>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM transactions WHERE id = ?",
        TRANSACTION_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(executor)
    .await
    .store_context("Failed to fetch transaction")?;

    Ok(row.as_ref().map(row_to_transaction).transpose()?)
}

/// Fixed-width RFC 3339 so that text ordering is time ordering.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid {} timestamp: {}", column, raw))?
        .with_timezone(&Utc))
}

fn decode_id(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {}: {}", column, raw))
}

fn decode_optional_id(raw: Option<String>, column: &str) -> Result<Option<Uuid>> {
    raw.map(|s| decode_id(&s, column)).transpose()
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let id_str: String = row.get("id");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(User {
        id: decode_id(&id_str, "user ID")?,
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        phone_number: row.get("phone_number"),
        balance_cents: row.get("balance_cents"),
        version: row.get("version"),
        created_at: decode_timestamp(&created_at_str, "created_at")?,
        updated_at: decode_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let id_str: String = row.get("id");
    let user_id_str: String = row.get("user_id");
    let kind_str: String = row.get("kind");
    let created_at_str: String = row.get("created_at");

    Ok(Transaction {
        id: decode_id(&id_str, "transaction ID")?,
        sequence: row.get("sequence"),
        user_id: decode_id(&user_id_str, "user ID")?,
        kind: kind_str.parse::<TransactionKind>()?,
        amount_cents: row.get("amount_cents"),
        description: row.get("description"),
        counterparty_user_id: decode_optional_id(
            row.get("counterparty_user_id"),
            "counterparty user ID",
        )?,
        reference_transaction_id: decode_optional_id(
            row.get("reference_transaction_id"),
            "reference transaction ID",
        )?,
        created_at: decode_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_transfer(row: &SqliteRow) -> Result<Transfer> {
    let id_str: String = row.get("id");
    let sender_str: String = row.get("sender_id");
    let recipient_str: String = row.get("recipient_id");
    let status_str: String = row.get("status");
    let sender_tx_str: String = row.get("sender_transaction_id");
    let recipient_tx_str: String = row.get("recipient_transaction_id");
    let created_at_str: String = row.get("created_at");

    Ok(Transfer {
        id: decode_id(&id_str, "transfer ID")?,
        sender_id: decode_id(&sender_str, "sender ID")?,
        recipient_id: decode_id(&recipient_str, "recipient ID")?,
        amount_cents: row.get("amount_cents"),
        description: row.get("description"),
        status: status_str
            .parse::<TransferStatus>()
            .map_err(anyhow::Error::msg)?,
        sender_transaction_id: decode_id(&sender_tx_str, "sender transaction ID")?,
        recipient_transaction_id: decode_id(&recipient_tx_str, "recipient transaction ID")?,
        created_at: decode_timestamp(&created_at_str, "created_at")?,
    })
}

/// `.context()` for sqlx results that also sorts out the errors callers react
/// to: busy/locked databases become `Conflict`, unique violations `Duplicate`.
trait SqlxResultExt<T> {
    fn store_context(self, what: &'static str) -> StoreResult<T>;
}

impl<T> SqlxResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn store_context(self, what: &'static str) -> StoreResult<T> {
        self.map_err(|err| classify(err, what))
    }
}

fn classify(err: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let message = db_err.message();
            if message.contains("users.username") {
                return StoreError::Duplicate { field: "username" };
            }
            if message.contains("users.email") {
                return StoreError::Duplicate { field: "email" };
            }
        }

        let primary = db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff);
        if matches!(primary, Some(SQLITE_BUSY | SQLITE_LOCKED)) {
            return StoreError::Conflict;
        }
    }
    StoreError::Storage(anyhow::Error::new(err).context(what))
}
