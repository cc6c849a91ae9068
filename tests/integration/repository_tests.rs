//! Service tests against a real Postgres database.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -- --ignored

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use tokio_test::{assert_err, assert_ok};

use library_server::{
    error::{AppError, AppResult},
    models::{
        book::{Book, CoverType, CreateBook},
        borrowing::{BorrowingStatus, CreateBorrowing},
        payment::{PaymentStatus, PaymentType},
        user::{Scope, User, UserClaims},
    },
    services::stripe::compute_signature,
};

use crate::support::{self, Harness, WEBHOOK_SECRET};

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn book(harness: &Harness, inventory: i32) -> Book {
    harness
        .services
        .books
        .create(CreateBook {
            title: "The Name of the Rose".to_string(),
            author: "Umberto Eco".to_string(),
            cover: CoverType::Hard,
            inventory,
            daily_fee: Decimal::new(150, 2),
        })
        .await
        .expect("create book")
}

async fn reader(harness: &Harness, email: &str) -> (User, UserClaims) {
    let user = harness
        .repository
        .users
        .create(email, "not-a-real-hash", None, None, false)
        .await
        .expect("create user");
    let claims = support::claims_for(&user);
    (user, claims)
}

fn request(book: &Book, days: i64) -> CreateBorrowing {
    CreateBorrowing {
        book_id: book.id,
        expected_return_date: today() + Duration::days(days),
    }
}

/// Insert a borrowing that fell due three days ago, bypassing the date check
async fn overdue_borrowing(harness: &Harness, book: &Book, user: &User) -> i32 {
    let mut tx = harness.repository.begin().await.unwrap();
    let borrowing = harness
        .repository
        .borrowings
        .create(
            &mut *tx,
            book.id,
            user.id,
            today() - Duration::days(10),
            today() - Duration::days(3),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();
    borrowing.id
}

async fn staff(harness: &Harness) -> User {
    harness
        .repository
        .users
        .create("staff@example.com", "not-a-real-hash", None, None, true)
        .await
        .expect("create staff")
}

async fn inventory(harness: &Harness, id: i32) -> i32 {
    harness.services.books.get(id).await.unwrap().inventory
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_borrow_and_return_cycle(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;
    let (_, bob) = reader(&harness, "bob@example.com").await;

    let created = assert_ok!(harness.services.borrowings.borrow(&alice, request(&book, 3), today()).await);
    assert_eq!(created.borrowing.status, BorrowingStatus::Active);
    assert_eq!(created.payment.payment_type, PaymentType::Payment);
    assert_eq!(created.payment.status, PaymentStatus::Pending);
    assert_eq!(created.payment.money_to_pay, Decimal::new(450, 2));
    assert!(created.payment.session_url.is_some());
    assert_eq!(inventory(&harness, book.id).await, 0);

    let request_sent = harness.gateway.last_request().expect("checkout request");
    assert_eq!(request_sent.amount_cents, 450);
    assert!(request_sent.success_url.starts_with("http://library.test/api/v1/payments/success"));

    let err = assert_err!(harness.services.borrowings.borrow(&bob, request(&book, 3), today()).await);
    assert!(matches!(err, AppError::OutOfStock(_)));
    assert_eq!(inventory(&harness, book.id).await, 0);

    let returned = harness
        .services
        .borrowings
        .return_borrowing(created.borrowing.id, alice.scope(), today())
        .await
        .unwrap();
    assert_eq!(returned.borrowing.status, BorrowingStatus::Returned);
    assert!(returned.fine.is_none());
    assert_eq!(returned.detail, "Book 'The Name of the Rose' returned successfully.");
    assert_eq!(inventory(&harness, book.id).await, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_borrow_out_of_stock_leaves_inventory(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 0).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let err = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::OutOfStock(_)));
    assert_eq!(inventory(&harness, book.id).await, 0);
    assert_eq!(harness.gateway.created(), 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_unknown_book(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let err = harness
        .services
        .borrowings
        .borrow(
            &alice,
            CreateBorrowing {
                book_id: 4242,
                expected_return_date: today() + Duration::days(1),
            },
            today(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_return_twice(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 2).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 1), today())
        .await
        .unwrap();
    let id = created.borrowing.id;

    harness
        .services
        .borrowings
        .return_borrowing(id, alice.scope(), today())
        .await
        .unwrap();
    let err = harness
        .services
        .borrowings
        .return_borrowing(id, alice.scope(), today())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::AlreadyReturned(_)));
    assert_eq!(inventory(&harness, book.id).await, 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_other_users_borrowing_is_hidden(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 2).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;
    let (bob, _) = reader(&harness, "bob@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 1), today())
        .await
        .unwrap();

    let err = harness
        .services
        .borrowings
        .get(created.borrowing.id, Scope::Owner(bob.id), today())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = harness
        .services
        .borrowings
        .return_borrowing(created.borrowing.id, Scope::Owner(bob.id), today())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // staff sees everything
    assert_ok!(harness.services.borrowings.get(created.borrowing.id, Scope::All, today()).await);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_unpaid_payment_blocks_new_borrow(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 5).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let first = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();

    let err = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnpaidPayments(_)));
    assert_eq!(inventory(&harness, book.id).await, 4);

    let session_id = first.payment.session_id.expect("session id");
    harness.gateway.pay(&session_id);
    harness.services.payments.confirm_success(&session_id).await.unwrap();

    assert_ok!(harness.services.borrowings.borrow(&alice, request(&book, 2), today()).await);
    assert_eq!(inventory(&harness, book.id).await, 3);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_gateway_failure_rolls_back_borrow(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    harness.gateway.set_failing(true);
    let err = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::PaymentGateway(_)));
    assert_eq!(inventory(&harness, book.id).await, 1);
    let listed = harness
        .services
        .borrowings
        .list(&alice, &Default::default(), today())
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_success_callback_is_idempotent(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();
    let session_id = created.payment.session_id.expect("session id");

    let pending = harness.services.payments.confirm_success(&session_id).await.unwrap();
    assert_eq!(pending.result, format!("session number {} is not paid yet", session_id));
    assert_eq!(pending.status, Some(PaymentStatus::Pending));

    harness.gateway.pay(&session_id);
    let first = harness.services.payments.confirm_success(&session_id).await.unwrap();
    assert_eq!(
        first.result,
        format!("session number {} was successfully paid. Thank you for using our service", session_id)
    );
    let second = harness.services.payments.confirm_success(&session_id).await.unwrap();
    assert_eq!(second.result, format!("session number {} has already been paid", session_id));
    assert_eq!(second.status, Some(PaymentStatus::Paid));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_unknown_session_callback(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    harness.gateway.pay("cs_nobody");

    let err = harness
        .services
        .payments
        .confirm_success("cs_nobody")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_overdue_scan_fines_once(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 3).await;
    let (alice, _) = reader(&harness, "alice@example.com").await;
    let id = overdue_borrowing(&harness, &book, &alice).await;

    let first = harness.services.borrowings.scan_overdue(today()).await.unwrap();
    assert_eq!(first.overdue, 1);
    assert_eq!(first.fines_created, 1);

    let second = harness.services.borrowings.scan_overdue(today()).await.unwrap();
    assert_eq!(second.overdue, 1);
    assert_eq!(second.fines_created, 0);

    let fines = harness
        .repository
        .payments
        .count_for(id, PaymentType::Fine)
        .await
        .unwrap();
    assert_eq!(fines, 1);

    let messages = harness.notifier.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("#borrowings_overdue"));
    assert!(messages[0].contains(&format!("borrowing_id: {}", id)));
    assert!(messages[0].contains("overdue: 3 days"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_overdue_scan_reports_nothing(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());

    let report = harness.services.borrowings.scan_overdue(today()).await.unwrap();
    assert_eq!(report.overdue, 0);

    let messages = harness.notifier.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("No borrowings overdue today!"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_late_return_fines_and_scan_does_not_duplicate(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (alice, claims) = reader(&harness, "alice@example.com").await;
    let id = overdue_borrowing(&harness, &book, &alice).await;

    let returned = harness
        .services
        .borrowings
        .return_borrowing(id, claims.scope(), today())
        .await
        .unwrap();

    let fine = returned.fine.expect("fine");
    assert_eq!(fine.payment_type, PaymentType::Fine);
    // 1.50 a day, 3 days late, doubled
    assert_eq!(fine.money_to_pay, Decimal::new(900, 2));
    assert!(returned.detail.ends_with("A fine of 9.00 is due."));

    let report = harness.services.borrowings.scan_overdue(today()).await.unwrap();
    assert_eq!(report.overdue, 0);
    assert_eq!(
        harness.repository.payments.count_for(id, PaymentType::Fine).await.unwrap(),
        1
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_sweep_expires_and_renew(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 2).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();
    let payment_id = created.payment.id;
    let session_id = created.payment.session_id.clone().expect("session id");

    let err = harness
        .services
        .payments
        .renew(payment_id, alice.scope())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    harness.gateway.expire(&session_id);
    assert_eq!(harness.services.payments.sweep_expired_sessions().await.unwrap(), 1);
    assert_eq!(harness.services.payments.sweep_expired_sessions().await.unwrap(), 0);

    let expired = harness.services.payments.get(payment_id, alice.scope()).await.unwrap();
    assert_eq!(expired.status, PaymentStatus::Expired);

    let renewed = harness
        .services
        .payments
        .renew(payment_id, alice.scope())
        .await
        .unwrap();
    assert_ne!(renewed.session_id, session_id);

    let pending = harness.services.payments.get(payment_id, alice.scope()).await.unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);
    assert_eq!(pending.session_id.as_deref(), Some(renewed.session_id.as_str()));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_free_book_needs_no_session(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let free = harness
        .services
        .books
        .create(CreateBook {
            title: "Public Domain".to_string(),
            author: "Anonymous".to_string(),
            cover: CoverType::Soft,
            inventory: 1,
            daily_fee: Decimal::ZERO,
        })
        .await
        .unwrap();
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&free, 2), today())
        .await
        .unwrap();

    assert_eq!(created.payment.status, PaymentStatus::Paid);
    assert!(created.payment.session_id.is_none());
    assert_eq!(harness.gateway.created(), 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_concurrent_borrows_of_one_user(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 5).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let borrowings = &harness.services.borrowings;
    let (first, second) = tokio::join!(
        borrowings.borrow(&alice, request(&book, 2), today()),
        borrowings.borrow(&alice, request(&book, 2), today()),
    );

    // the second borrow waits on the user row, then sees the first rental payment
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AppError::UnpaidPayments(_)))));
    assert_eq!(inventory(&harness, book.id).await, 4);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_concurrent_borrows_of_last_copy(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;
    let (_, bob) = reader(&harness, "bob@example.com").await;

    let borrowings = &harness.services.borrowings;
    let (first, second) = tokio::join!(
        borrowings.borrow(&alice, request(&book, 2), today()),
        borrowings.borrow(&bob, request(&book, 2), today()),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(AppError::OutOfStock(_)))));
    assert_eq!(inventory(&harness, book.id).await, 0);

    // the losing borrow rolled back its borrowing row as well
    let listed = harness
        .services
        .borrowings
        .list(&support::claims_for(&staff(&harness).await), &Default::default(), today())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_overdue_scan_continues_after_failed_fine(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 3).await;
    let (alice, _) = reader(&harness, "alice@example.com").await;
    let (bob, _) = reader(&harness, "bob@example.com").await;
    let first = overdue_borrowing(&harness, &book, &alice).await;
    let second = overdue_borrowing(&harness, &book, &bob).await;

    harness.gateway.reject_reference(&format!("borrowing-{}-fine", first));
    let err = assert_err!(harness.services.borrowings.scan_overdue(today()).await);
    assert!(matches!(err, AppError::Internal(_)));

    let payments = &harness.repository.payments;
    assert_eq!(payments.count_for(first, PaymentType::Fine).await.unwrap(), 0);
    assert_eq!(payments.count_for(second, PaymentType::Fine).await.unwrap(), 1);

    // the staff report still lists both borrowings
    let messages = harness.notifier.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains(&format!("borrowing_id: {}", first)));
    assert!(messages[0].contains(&format!("borrowing_id: {}", second)));

    harness.gateway.clear_rejections();
    let retry = assert_ok!(harness.services.borrowings.scan_overdue(today()).await);
    assert_eq!(retry.overdue, 2);
    assert_eq!(retry.fines_created, 1);
    assert_eq!(payments.count_for(first, PaymentType::Fine).await.unwrap(), 1);
}

async fn open_sessions(harness: &Harness, borrowing_id: i32) -> usize {
    harness
        .repository
        .payments
        .list_for_borrowings(&[borrowing_id])
        .await
        .unwrap()
        .iter()
        .filter(|p| p.status == PaymentStatus::Pending && p.session_id.is_some())
        .count()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_late_fine_waits_for_rental_session(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();
    let id = created.borrowing.id;
    let rental_session = created.payment.session_id.clone().expect("session id");

    // returned three days late with the rental still unpaid
    let returned = harness
        .services
        .borrowings
        .return_borrowing(id, alice.scope(), today() + Duration::days(5))
        .await
        .unwrap();
    let fine = returned.fine.expect("fine");
    assert_eq!(fine.money_to_pay, Decimal::new(900, 2));
    assert_eq!(fine.status, PaymentStatus::Pending);
    assert!(fine.session_id.is_none());
    assert!(returned
        .detail
        .ends_with("A fine of 9.00 is due. Its payment link opens once the rental payment is settled."));
    assert_eq!(harness.gateway.created(), 1);
    assert_eq!(open_sessions(&harness, id).await, 1);

    let err = assert_err!(harness.services.payments.renew(fine.id, alice.scope()).await);
    assert!(matches!(err, AppError::Conflict(_)));

    harness.gateway.pay(&rental_session);
    assert_ok!(harness.services.payments.confirm_success(&rental_session).await);

    let fine = harness.services.payments.get(fine.id, alice.scope()).await.unwrap();
    assert_eq!(fine.status, PaymentStatus::Pending);
    assert!(fine.session_id.is_some());
    assert_eq!(harness.gateway.created(), 2);
    assert_eq!(
        harness.gateway.last_request().expect("checkout request").reference,
        format!("borrowing-{}-fine", id)
    );
    assert_eq!(open_sessions(&harness, id).await, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_sweep_opens_fine_after_rental_expires(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();
    let id = created.borrowing.id;
    let rental = created.payment;

    let returned = harness
        .services
        .borrowings
        .return_borrowing(id, alice.scope(), today() + Duration::days(5))
        .await
        .unwrap();
    let fine = returned.fine.expect("fine");
    assert!(fine.session_id.is_none());

    harness.gateway.expire(rental.session_id.as_deref().expect("session id"));
    assert_eq!(harness.services.payments.sweep_expired_sessions().await.unwrap(), 1);

    let fine = harness.services.payments.get(fine.id, alice.scope()).await.unwrap();
    assert!(fine.session_id.is_some());
    assert_eq!(open_sessions(&harness, id).await, 1);

    // the rental cannot be reopened while the fine session is payable
    let err = assert_err!(harness.services.payments.renew(rental.id, alice.scope()).await);
    assert!(matches!(err, AppError::Conflict(_)));
}

/// Deliver a signed `checkout.session.*` event to the payments service
async fn deliver_webhook(
    harness: &Harness,
    event_type: &str,
    session_id: &str,
    payment_status: &str,
) -> AppResult<()> {
    let payload = json!({
        "id": format!("evt_{}", session_id),
        "type": event_type,
        "data": {"object": {"id": session_id, "payment_status": payment_status}}
    })
    .to_string();
    let now = Utc::now().timestamp();
    let signature = compute_signature(payload.as_bytes(), WEBHOOK_SECRET, now)?;

    harness
        .services
        .payments
        .handle_webhook(payload.as_bytes(), Some(&format!("t={},v1={}", now, signature)), now)
        .await
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_completed_webhook_pays_once(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();
    let session_id = created.payment.session_id.clone().expect("session id");

    assert_ok!(deliver_webhook(&harness, "checkout.session.completed", &session_id, "paid").await);
    let paid = harness
        .repository
        .payments
        .get_by_id(created.payment.id, Scope::All)
        .await
        .unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);

    // redelivery leaves the row untouched
    assert_ok!(deliver_webhook(&harness, "checkout.session.completed", &session_id, "paid").await);
    let again = harness
        .repository
        .payments
        .get_by_id(created.payment.id, Scope::All)
        .await
        .unwrap();
    assert_eq!(again.status, PaymentStatus::Paid);
    assert_eq!(again.updated_at, paid.updated_at);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_completed_webhook_without_payment_keeps_pending(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 1).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;

    let created = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();
    let session_id = created.payment.session_id.clone().expect("session id");

    assert_ok!(deliver_webhook(&harness, "checkout.session.completed", &session_id, "unpaid").await);
    let payment = harness.services.payments.get(created.payment.id, Scope::All).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_expired_webhook(pool: PgPool) {
    let harness = Harness::new(pool, support::test_config());
    let book = book(&harness, 2).await;
    let (_, alice) = reader(&harness, "alice@example.com").await;
    let (_, bob) = reader(&harness, "bob@example.com").await;

    let abandoned = harness
        .services
        .borrowings
        .borrow(&alice, request(&book, 2), today())
        .await
        .unwrap();
    let abandoned_session = abandoned.payment.session_id.clone().expect("session id");

    assert_ok!(deliver_webhook(&harness, "checkout.session.expired", &abandoned_session, "unpaid").await);
    let expired = harness.services.payments.get(abandoned.payment.id, Scope::All).await.unwrap();
    assert_eq!(expired.status, PaymentStatus::Expired);

    // a late expiry does not undo a payment
    let settled = harness
        .services
        .borrowings
        .borrow(&bob, request(&book, 2), today())
        .await
        .unwrap();
    let settled_session = settled.payment.session_id.clone().expect("session id");
    assert_ok!(deliver_webhook(&harness, "checkout.session.completed", &settled_session, "paid").await);
    assert_ok!(deliver_webhook(&harness, "checkout.session.expired", &settled_session, "unpaid").await);

    let paid = harness.services.payments.get(settled.payment.id, Scope::All).await.unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
}
