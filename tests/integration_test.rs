mod common;

use anyhow::Result;
use common::{create_user, funded_user, test_service};
use uuid::Uuid;
use wallet_ledger::LedgerConfig;
use wallet_ledger::application::{AppError, LedgerService, MoneyRequest, NewUser, PageRequest};
use wallet_ledger::domain::TransactionKind;

#[tokio::test]
async fn test_create_and_fetch_user() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let created = service
        .create_user(
            NewUser::new("alice", "alice@example.com", "correct horse").with_phone_number("555-0100"),
        )
        .await?;
    assert_eq!(created.balance_cents, 0);
    assert!(created.verify_password("correct horse"));
    assert!(!created.verify_password("wrong"));

    let fetched = service.get_user(created.id).await?;
    assert_eq!(fetched, created);
    assert_eq!(fetched.phone_number.as_deref(), Some("555-0100"));

    let balance = service.get_balance(created.id).await?;
    assert_eq!(balance.balance, 0);
    assert_eq!(balance.last_updated, created.updated_at);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_username_and_email_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    create_user(&service, "alice").await?;

    let same_name = service
        .create_user(NewUser::new("alice", "other@example.com", "pw"))
        .await;
    assert!(matches!(
        same_name,
        Err(AppError::UserAlreadyExists { field: "username", .. })
    ));

    let same_email = service
        .create_user(NewUser::new("alicia", "alice@example.com", "pw"))
        .await;
    assert!(matches!(
        same_email,
        Err(AppError::UserAlreadyExists { field: "email", .. })
    ));

    assert_eq!(service.list_users().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_user_input_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service
        .create_user(NewUser::new("bob", "not-an-email", "pw"))
        .await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));
    assert!(service.list_users().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_list_users_in_creation_order() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = create_user(&service, "alice").await?;
    let bob = create_user(&service, "bob").await?;

    let users = service.list_users().await?;
    let ids: Vec<_> = users.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![alice.id, bob.id]);

    Ok(())
}

#[tokio::test]
async fn test_deposit_then_withdraw_restores_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = create_user(&service, "alice").await?;

    let deposit = service
        .deposit(MoneyRequest::new(user.id, 2_500).with_description("paycheck"))
        .await?;
    assert_eq!(deposit.new_balance, 2_500);
    assert_eq!(deposit.transaction.kind, TransactionKind::Credit);
    assert_eq!(deposit.transaction.description.as_deref(), Some("paycheck"));

    let withdrawal = service.withdraw(MoneyRequest::new(user.id, 2_500)).await?;
    assert_eq!(withdrawal.new_balance, 0);
    assert_eq!(withdrawal.transaction.kind, TransactionKind::Debit);
    assert!(withdrawal.transaction.sequence > deposit.transaction.sequence);

    assert_eq!(service.get_balance(user.id).await?.balance, 0);

    let page = service
        .list_transactions(user.id, PageRequest::default())
        .await?;
    assert_eq!(page.total, 2);
    let kinds: Vec<_> = page.items.iter().map(|tx| tx.kind).collect();
    assert_eq!(kinds, vec![TransactionKind::Debit, TransactionKind::Credit]);

    Ok(())
}

#[tokio::test]
async fn test_withdraw_more_than_balance_fails_without_side_effects() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, "alice", 1_000).await?;

    let result = service.withdraw(MoneyRequest::new(user.id, 1_001)).await;
    match result {
        Err(AppError::InsufficientFunds {
            user_id,
            balance,
            required,
        }) => {
            assert_eq!(user_id, user.id);
            assert_eq!(balance, 1_000);
            assert_eq!(required, 1_001);
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    let after = service.get_user(user.id).await?;
    assert_eq!(after.balance_cents, 1_000);
    assert_eq!(after.version, user.version);
    let page = service
        .list_transactions(user.id, PageRequest::default())
        .await?;
    assert_eq!(page.total, 1);

    Ok(())
}

#[tokio::test]
async fn test_non_positive_amounts_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, "alice", 100).await?;

    for amount in [0, -100] {
        let deposit = service.deposit(MoneyRequest::new(user.id, amount)).await;
        assert!(matches!(deposit, Err(AppError::InvalidAmount(_))));
        let withdraw = service.withdraw(MoneyRequest::new(user.id, amount)).await;
        assert!(matches!(withdraw, Err(AppError::InvalidAmount(_))));
    }

    assert_eq!(service.get_balance(user.id).await?.balance, 100);
    Ok(())
}

#[tokio::test]
async fn test_operations_on_unknown_user() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let ghost = Uuid::new_v4();

    assert!(matches!(
        service.get_user(ghost).await,
        Err(AppError::UserNotFound(id)) if id == ghost
    ));
    assert!(matches!(
        service.get_balance(ghost).await,
        Err(AppError::UserNotFound(_))
    ));
    assert!(matches!(
        service.deposit(MoneyRequest::new(ghost, 100)).await,
        Err(AppError::UserNotFound(_))
    ));
    assert!(matches!(
        service.list_transactions(ghost, PageRequest::default()).await,
        Err(AppError::UserNotFound(_))
    ));
    assert!(matches!(
        service.get_transaction(Uuid::new_v4()).await,
        Err(AppError::TransactionNotFound(_))
    ));
    assert!(matches!(
        service.get_transfer(Uuid::new_v4()).await,
        Err(AppError::TransferNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_transaction_pagination() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = create_user(&service, "alice").await?;

    for i in 1..=5 {
        service
            .deposit(MoneyRequest::new(user.id, i * 100).with_description(format!("deposit {}", i)))
            .await?;
    }

    let first = service
        .list_transactions(user.id, PageRequest::new(0, 2))
        .await?;
    assert_eq!(first.total, 5);
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more());
    assert_eq!(first.items[0].amount_cents, 500);
    assert_eq!(first.items[1].amount_cents, 400);

    let last = service
        .list_transactions(user.id, PageRequest::new(4, 2))
        .await?;
    assert_eq!(last.total, 5);
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].amount_cents, 100);
    assert!(!last.has_more());

    let empty = service
        .list_transactions(user.id, PageRequest::new(0, 0))
        .await?;
    assert!(empty.items.is_empty());
    assert_eq!(empty.total, 5);

    let beyond = service
        .list_transactions(user.id, PageRequest::new(50, 10))
        .await?;
    assert!(beyond.items.is_empty());

    let too_big = service
        .list_transactions(user.id, PageRequest::new(0, 101))
        .await;
    assert!(matches!(
        too_big,
        Err(AppError::InvalidPagination { limit: 101, max: 100 })
    ));

    // Newest first across the whole history
    let all = service
        .list_transactions(user.id, PageRequest::default())
        .await?;
    assert!(
        all.items
            .windows(2)
            .all(|pair| pair[0].created_at >= pair[1].created_at)
    );

    Ok(())
}

#[tokio::test]
async fn test_get_transaction_round_trip() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = create_user(&service, "alice").await?;

    let result = service
        .deposit(MoneyRequest::new(user.id, 1_234).with_description("gift"))
        .await?;
    let fetched = service.get_transaction(result.transaction.id).await?;
    assert_eq!(fetched, result.transaction);

    Ok(())
}

#[tokio::test]
async fn test_post_transaction() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = create_user(&service, "alice").await?;

    let credit = service
        .post_transaction(TransactionKind::Credit, MoneyRequest::new(user.id, 700))
        .await?;
    assert_eq!(credit.new_balance, 700);

    let debit = service
        .post_transaction(TransactionKind::Debit, MoneyRequest::new(user.id, 200))
        .await?;
    assert_eq!(debit.new_balance, 500);

    for kind in [TransactionKind::TransferIn, TransactionKind::TransferOut] {
        let result = service
            .post_transaction(kind, MoneyRequest::new(user.id, 100))
            .await;
        assert!(matches!(result, Err(AppError::InvalidKind(k)) if k == kind));
    }

    assert_eq!(service.get_balance(user.id).await?.balance, 500);
    Ok(())
}

#[tokio::test]
async fn test_data_survives_reconnect() -> Result<()> {
    let (service, temp) = test_service().await?;
    let user = funded_user(&service, "alice", 4_200).await?;
    drop(service);

    let db_path = temp.path().join("test.db");
    let reopened =
        LedgerService::connect(db_path.to_str().unwrap(), LedgerConfig::default()).await?;
    assert_eq!(reopened.get_balance(user.id).await?.balance, 4_200);
    assert_eq!(
        reopened
            .list_transactions(user.id, PageRequest::default())
            .await?
            .total,
        1
    );

    Ok(())
}

#[tokio::test]
async fn test_integrity_healthy_after_mixed_workload() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = funded_user(&service, "alice", 10_000).await?;
    let bob = funded_user(&service, "bob", 2_000).await?;

    service.withdraw(MoneyRequest::new(alice.id, 1_500)).await?;
    service
        .transfer(wallet_ledger::application::TransferRequest::new(
            alice.id, bob.id, 3_000,
        ))
        .await?;
    let _ = service.withdraw(MoneyRequest::new(bob.id, 1_000_000)).await;

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.user_count, 2);
    assert_eq!(report.transaction_count, 5);
    assert_eq!(report.transfer_count, 1);
    assert_eq!(report.total_balance, 10_500);
    assert_eq!(report.net_external_flow, 10_500);

    Ok(())
}

#[tokio::test]
async fn test_integrity_with_balances_summing_past_cents_range() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let half = i64::MAX / 2 + 1;
    funded_user(&service, "alice", half).await?;
    funded_user(&service, "bob", half).await?;

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.total_balance, i128::from(half) * 2);
    assert_eq!(report.net_external_flow, report.total_balance);

    Ok(())
}
