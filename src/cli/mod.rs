use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{
    AppError, LedgerService, MoneyRequest, MovementResult, NewUser, PageRequest, TransferRequest,
};
use crate::config::LedgerConfig;
use crate::domain::{
    CentsTotal, Transaction, TransactionKind, Transfer, User, format_cents, parse_cents,
};
use crate::logging::{LogFormat, init_logging};

/// Wallet - ledger-backed user balances
#[derive(Parser)]
#[command(name = "wallet")]
#[command(about = "A wallet service keeping user balances on an append-only ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "WALLET_DATABASE", default_value = "wallet.db", global = true)]
    pub database: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log format: pretty, json
    #[arg(long, env = "WALLET_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Retries for an operation that hit a concurrent write
    #[arg(long, env = "WALLET_MAX_RETRIES", global = true)]
    pub max_retries: Option<u32>,

    /// How long SQLite waits on a locked database, in milliseconds
    #[arg(long, env = "WALLET_BUSY_TIMEOUT_MS", global = true)]
    pub busy_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Show the current balance of a user
    Balance {
        /// User ID
        user: String,
    },

    /// Add money to a user's wallet
    Deposit {
        /// User ID
        user: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the deposit
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Take money out of a user's wallet
    Withdraw {
        /// User ID
        user: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the withdrawal
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Post a CREDIT or DEBIT transaction
    Post {
        /// User ID
        user: String,

        /// Transaction kind: credit, debit
        kind: TransactionKind,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the transaction
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List a user's transactions, newest first
    Transactions {
        /// User ID
        user: String,

        /// Number of transactions to skip
        #[arg(long, default_value = "0")]
        offset: u32,

        /// Maximum number of transactions to show (at most 100)
        #[arg(short, long, default_value = "100")]
        limit: u32,
    },

    /// Show a single transaction
    Transaction {
        /// Transaction ID
        id: String,
    },

    /// Move money from one user to another
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Sender user ID
        #[arg(long)]
        from: String,

        /// Recipient user ID
        #[arg(long)]
        to: String,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show detailed transfer information
    ShowTransfer {
        /// Transfer ID
        id: String,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a new user
    Create {
        /// Username (must be unique)
        username: String,

        /// Email address (must be unique)
        #[arg(short, long)]
        email: String,

        /// Password
        #[arg(short, long)]
        password: String,

        /// Phone number
        #[arg(long)]
        phone: Option<String>,
    },

    /// Show a user
    Show {
        /// User ID
        id: String,
    },

    /// List all users
    List,
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::default();
        if let Some(retries) = self.max_retries {
            config = config.with_max_retries(retries);
        }
        if let Some(ms) = self.busy_timeout_ms {
            config = config.with_busy_timeout(Duration::from_millis(ms));
        }
        config
    }

    pub async fn run(self) -> Result<()> {
        let level = if self.verbose { "wallet_ledger=debug" } else { "warn" };
        init_logging(level, self.log_format);

        let config = self.config();
        let json = self.json;

        if let Commands::Init = self.command {
            LedgerService::init(&self.database, config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(&self.database, config)
            .await
            .with_context(|| format!("Failed to open database '{}'", self.database))?;

        match self.command {
            Commands::Init => {}

            Commands::User(user_cmd) => run_user_command(&service, user_cmd, json).await?,

            Commands::Balance { user } => {
                let info = service.get_balance(parse_id(&user, "user")?).await?;
                if json {
                    print_json(&info)?;
                } else {
                    println!("{}: {}", info.user_id, format_cents(info.balance));
                    println!(
                        "  Last updated: {}",
                        info.last_updated.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }

            Commands::Deposit {
                user,
                amount,
                description,
            } => {
                let request = money_request(&user, &amount, description)?;
                let result = service.deposit(request).await?;
                print_movement("Deposited", &result, json)?;
            }

            Commands::Withdraw {
                user,
                amount,
                description,
            } => {
                let request = money_request(&user, &amount, description)?;
                let result = service.withdraw(request).await?;
                print_movement("Withdrew", &result, json)?;
            }

            Commands::Post {
                user,
                kind,
                amount,
                description,
            } => {
                let request = money_request(&user, &amount, description)?;
                let result = service.post_transaction(kind, request).await?;
                print_movement("Posted", &result, json)?;
            }

            Commands::Transactions {
                user,
                offset,
                limit,
            } => {
                let user_id = parse_id(&user, "user")?;
                let page = service
                    .list_transactions(user_id, PageRequest::new(offset, limit))
                    .await?;
                if json {
                    print_json(&page)?;
                } else if page.items.is_empty() {
                    println!("No transactions found.");
                } else {
                    println!(
                        "{:<36} {:<19} {:<12} {:>12}  DESCRIPTION",
                        "ID", "DATE", "KIND", "AMOUNT"
                    );
                    println!("{}", "-".repeat(96));
                    for tx in &page.items {
                        print_transaction_row(tx);
                    }
                    println!();
                    println!(
                        "Showing {}-{} of {}",
                        page.offset + 1,
                        u64::from(page.offset) + page.items.len() as u64,
                        page.total
                    );
                }
            }

            Commands::Transaction { id } => {
                let tx = service.get_transaction(parse_id(&id, "transaction")?).await?;
                if json {
                    print_json(&tx)?;
                } else {
                    print_transaction_detail(&tx);
                }
            }

            Commands::Transfer {
                amount,
                from,
                to,
                description,
            } => {
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let mut request = TransferRequest::new(
                    parse_id(&from, "sender")?,
                    parse_id(&to, "recipient")?,
                    amount_cents,
                );
                if let Some(desc) = description {
                    request = request.with_description(desc);
                }

                let result = service.transfer(request).await?;
                if json {
                    print_json(&result)?;
                } else {
                    println!(
                        "Transferred {} {} -> {} ({})",
                        format_cents(result.transfer.amount_cents),
                        result.transfer.sender_id,
                        result.transfer.recipient_id,
                        result.transfer.id
                    );
                    println!(
                        "  Sender balance:    {}",
                        format_cents(result.sender_new_balance)
                    );
                    println!(
                        "  Recipient balance: {}",
                        format_cents(result.recipient_new_balance)
                    );
                }
            }

            Commands::ShowTransfer { id } => {
                let transfer = service.get_transfer(parse_id(&id, "transfer")?).await?;
                if json {
                    print_json(&transfer)?;
                } else {
                    print_transfer_detail(&transfer);
                }
            }

            Commands::Check => run_check_command(&service, json).await?,
        }

        Ok(())
    }
}

/// Process exit status for a failed command: 2 for rejected input, 3 for a
/// missing record, 4 for insufficient funds, 1 for everything else.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AppError>() {
        Some(app) if app.is_validation() => 2,
        Some(app) if app.is_not_found() => 3,
        Some(AppError::InsufficientFunds { .. }) => 4,
        _ => 1,
    }
}

async fn run_user_command(service: &LedgerService, cmd: UserCommands, json: bool) -> Result<()> {
    match cmd {
        UserCommands::Create {
            username,
            email,
            password,
            phone,
        } => {
            let mut new_user = NewUser::new(username, email, password);
            if let Some(phone) = phone {
                new_user = new_user.with_phone_number(phone);
            }
            let user = service.create_user(new_user).await?;
            if json {
                print_json(&user)?;
            } else {
                println!("Created user: {} ({})", user.username, user.id);
            }
        }

        UserCommands::Show { id } => {
            let user = service.get_user(parse_id(&id, "user")?).await?;
            if json {
                print_json(&user)?;
            } else {
                print_user_detail(&user);
            }
        }

        UserCommands::List => {
            let users = service.list_users().await?;
            if json {
                print_json(&users)?;
            } else if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<36} {:<20} {:<28} {:>12}",
                    "ID", "USERNAME", "EMAIL", "BALANCE"
                );
                println!("{}", "-".repeat(99));
                for user in users {
                    println!(
                        "{:<36} {:<20} {:<28} {:>12}",
                        user.id,
                        user.username,
                        user.email,
                        format_cents(user.balance_cents)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService, json: bool) -> Result<()> {
    let report = service.check_integrity().await?;

    if json {
        let issues: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
        print_json(&serde_json::json!({
            "healthy": report.is_healthy(),
            "user_count": report.user_count,
            "transaction_count": report.transaction_count,
            "transfer_count": report.transfer_count,
            "total_balance": wide_json(report.total_balance),
            "net_external_flow": wide_json(report.net_external_flow),
            "issues": issues,
        }))?;
    } else {
        println!("Checking ledger integrity...\n");
        println!("Users:        {}", report.user_count);
        println!("Transactions: {}", report.transaction_count);
        println!("Transfers:    {}", report.transfer_count);
        println!();
        println!(
            "  {:<20} {:>12}",
            "Total balance:",
            format_cents(report.total_balance)
        );
        println!(
            "  {:<20} {:>12}  {}",
            "Deposits - debits:",
            format_cents(report.net_external_flow),
            if report.total_balance == report.net_external_flow {
                "OK"
            } else {
                "MISMATCH!"
            }
        );
        println!();

        if report.is_healthy() {
            println!("Ledger is consistent.");
        } else {
            println!("Issues found:");
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
    }

    if !report.is_healthy() {
        anyhow::bail!("Ledger integrity check failed");
    }
    Ok(())
}

/// Ledger-wide totals can exceed what a JSON number holds; fall back to a string.
fn wide_json(total: CentsTotal) -> serde_json::Value {
    i64::try_from(total)
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::String(total.to_string()))
}

fn money_request(user: &str, amount: &str, description: Option<String>) -> Result<MoneyRequest> {
    let amount_cents = parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")?;
    let mut request = MoneyRequest::new(parse_id(user, "user")?, amount_cents);
    if let Some(desc) = description {
        request = request.with_description(desc);
    }
    Ok(request)
}

fn parse_id(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {} ID: '{}'", what, value))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_movement(verb: &str, result: &MovementResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }
    let tx = &result.transaction;
    println!(
        "{} {} ({}, {})",
        verb,
        format_cents(tx.amount_cents),
        tx.kind,
        tx.id
    );
    println!("  New balance: {}", format_cents(result.new_balance));
    Ok(())
}

fn print_transaction_row(tx: &Transaction) {
    println!(
        "{:<36} {:<19} {:<12} {:>12}  {}",
        tx.id,
        tx.created_at.format("%Y-%m-%d %H:%M:%S"),
        tx.kind,
        format_cents(tx.signed_amount()),
        tx.description.as_deref().unwrap_or("")
    );
}

fn print_transaction_detail(tx: &Transaction) {
    println!("Transaction: {}", tx.id);
    println!("  Sequence:    {}", tx.sequence);
    println!("  User:        {}", tx.user_id);
    println!("  Kind:        {}", tx.kind);
    println!("  Amount:      {}", format_cents(tx.amount_cents));
    if let Some(desc) = &tx.description {
        println!("  Description: {}", desc);
    }
    if let Some(counterparty) = tx.counterparty_user_id {
        println!("  Counterparty: {}", counterparty);
    }
    if let Some(reference) = tx.reference_transaction_id {
        println!("  References:  {}", reference);
    }
    println!(
        "  Recorded at: {}",
        tx.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_transfer_detail(transfer: &Transfer) {
    println!("Transfer: {}", transfer.id);
    println!("  Status:      {}", transfer.status);
    println!("  Amount:      {}", format_cents(transfer.amount_cents));
    println!("  From:        {}", transfer.sender_id);
    println!("  To:          {}", transfer.recipient_id);
    if let Some(desc) = &transfer.description {
        println!("  Description: {}", desc);
    }
    println!("  Sender leg:    {}", transfer.sender_transaction_id);
    println!("  Recipient leg: {}", transfer.recipient_transaction_id);
    println!(
        "  Created at:  {}",
        transfer.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_user_detail(user: &User) {
    println!("User: {}", user.username);
    println!("  ID:         {}", user.id);
    println!("  Email:      {}", user.email);
    if let Some(phone) = &user.phone_number {
        println!("  Phone:      {}", phone);
    }
    println!("  Balance:    {}", format_cents(user.balance_cents));
    println!(
        "  Created at: {}",
        user.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}
