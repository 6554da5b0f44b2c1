// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use wallet_ledger::LedgerConfig;
use wallet_ledger::application::{LedgerService, MoneyRequest, NewUser};
use wallet_ledger::domain::{Cents, User};
use wallet_ledger::storage::MemoryRepository;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap(), LedgerConfig::default()).await?;
    Ok((service, temp_dir))
}

/// Service over the in-memory store, plus a handle for failure injection
pub fn memory_service() -> (LedgerService, MemoryRepository) {
    let store = MemoryRepository::new();
    let service = LedgerService::new(Arc::new(store.clone()), LedgerConfig::default());
    (service, store)
}

/// Register a user named `name` with a derived email address
pub async fn create_user(service: &LedgerService, name: &str) -> Result<User> {
    let user = service
        .create_user(NewUser::new(name, format!("{}@example.com", name), "secret"))
        .await?;
    Ok(user)
}

/// Register a user and deposit `balance` into their wallet
pub async fn funded_user(service: &LedgerService, name: &str, balance: Cents) -> Result<User> {
    let user = create_user(service, name).await?;
    if balance > 0 {
        service
            .deposit(MoneyRequest::new(user.id, balance).with_description("opening balance"))
            .await?;
    }
    Ok(service.get_user(user.id).await?)
}
