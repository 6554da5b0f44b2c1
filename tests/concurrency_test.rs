mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{funded_user, test_service};
use wallet_ledger::application::{AppError, MoneyRequest, PageRequest, TransferRequest};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let user = funded_user(&service, "alice", 1_000).await?;
    let user_id = user.id;

    // Ten withdrawals of 300 against 1000: exactly three fit
    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.withdraw(MoneyRequest::new(user_id, 300)).await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => succeeded += 1,
            Err(AppError::InsufficientFunds { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(insufficient, 7);
    assert_eq!(service.get_balance(user.id).await?.balance, 100);

    let page = service
        .list_transactions(user.id, PageRequest::default())
        .await?;
    assert_eq!(page.total, 4);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_all_land() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let user = funded_user(&service, "alice", 0).await?;
    let user_id = user.id;

    let mut handles = Vec::new();
    for i in 1..=20 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.deposit(MoneyRequest::new(user_id, i)).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(service.get_balance(user.id).await?.balance, (1..=20).sum::<i64>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_conserve_total() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let alice = funded_user(&service, "alice", 10_000).await?;
    let bob = funded_user(&service, "bob", 10_000).await?;

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = Arc::clone(&service);
        let (from, to) = if i % 2 == 0 {
            (alice.id, bob.id)
        } else {
            (bob.id, alice.id)
        };
        handles.push(tokio::spawn(async move {
            service.transfer(TransferRequest::new(from, to, 250)).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let alice_balance = service.get_balance(alice.id).await?.balance;
    let bob_balance = service.get_balance(bob.id).await?.balance;
    assert_eq!(alice_balance + bob_balance, 20_000);
    assert_eq!(alice_balance, 10_000);

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.transfer_count, 20);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_operations_keep_balances_non_negative() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);
    let alice = funded_user(&service, "alice", 500).await?;
    let bob = funded_user(&service, "bob", 500).await?;

    let mut handles = Vec::new();
    for i in 0..30 {
        let service = Arc::clone(&service);
        let (alice_id, bob_id) = (alice.id, bob.id);
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => service
                    .transfer(TransferRequest::new(alice_id, bob_id, 200))
                    .await
                    .map(|_| ()),
                1 => service
                    .withdraw(MoneyRequest::new(bob_id, 150))
                    .await
                    .map(|_| ()),
                _ => service
                    .deposit(MoneyRequest::new(alice_id, 50))
                    .await
                    .map(|_| ()),
            }
        }));
    }
    for handle in handles {
        match handle.await? {
            Ok(()) | Err(AppError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert!(service.get_balance(alice.id).await?.balance >= 0);
    assert!(service.get_balance(bob.id).await?.balance >= 0);
    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_across_many_users() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);

    let mut user_ids = Vec::new();
    for i in 0..40 {
        user_ids.push(funded_user(&service, &format!("user{}", i), 0).await?.id);
    }

    // Different users never share a lock, so these all hit SQLite at once
    let mut handles = Vec::new();
    for &user_id in &user_ids {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.deposit(MoneyRequest::new(user_id, 100)).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    for &user_id in &user_ids {
        assert_eq!(service.get_balance(user_id).await?.balance, 100);
    }
    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.total_balance, 4_000);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_between_disjoint_pairs() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);

    let mut pairs = Vec::new();
    for i in 0..15 {
        let sender = funded_user(&service, &format!("sender{}", i), 1_000).await?;
        let recipient = funded_user(&service, &format!("recipient{}", i), 0).await?;
        pairs.push((sender.id, recipient.id));
    }

    let mut handles = Vec::new();
    for &(from, to) in &pairs {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.transfer(TransferRequest::new(from, to, 400)).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    for &(from, to) in &pairs {
        assert_eq!(service.get_balance(from).await?.balance, 600);
        assert_eq!(service.get_balance(to).await?.balance, 400);
    }
    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.transfer_count, 15);

    Ok(())
}
