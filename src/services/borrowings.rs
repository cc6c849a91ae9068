//! Borrowing lifecycle: borrow, return and the overdue scan

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgConnection;

use super::{
    notifications::{new_borrowing_message, overdue_report_message, NotificationService},
    payments::Checkout,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        borrowing::{
            Borrowing, BorrowingCreated, BorrowingDetails, BorrowingQuery, BorrowingShort,
            CreateBorrowing, OverdueReport, ReturnResponse,
        },
        payment::{NewPayment, Payment, PaymentDetails, PaymentShort, PaymentType},
        user::{Scope, UserClaims},
    },
    repository::Repository,
    rules,
};

#[derive(Clone)]
pub struct BorrowingsService {
    repository: Repository,
    checkout: Checkout,
    notifications: NotificationService,
    fine_multiplier: Decimal,
}

fn short(borrowing: &Borrowing, book: &Book) -> BorrowingShort {
    BorrowingShort {
        id: borrowing.id,
        book_id: book.id,
        book_title: book.title.clone(),
        user_id: borrowing.user_id,
        borrow_date: borrowing.borrow_date,
        expected_return_date: borrowing.expected_return_date,
        actual_return_date: borrowing.actual_return_date,
    }
}

fn details(borrowing: Borrowing, book: Book, payments: Vec<PaymentShort>, today: NaiveDate) -> BorrowingDetails {
    BorrowingDetails {
        id: borrowing.id,
        borrow_date: borrowing.borrow_date,
        expected_return_date: borrowing.expected_return_date,
        actual_return_date: borrowing.actual_return_date,
        status: rules::borrowing_status(&borrowing, today),
        book,
        user_id: borrowing.user_id,
        payments,
    }
}

impl BorrowingsService {
    pub fn new(
        repository: Repository,
        checkout: Checkout,
        notifications: NotificationService,
        fine_multiplier: Decimal,
    ) -> Self {
        Self {
            repository,
            checkout,
            notifications,
            fine_multiplier,
        }
    }

    /// List borrowings. Only staff may filter on another user.
    pub async fn list(
        &self,
        claims: &UserClaims,
        query: &BorrowingQuery,
        today: NaiveDate,
    ) -> AppResult<Vec<BorrowingDetails>> {
        if query.user_id.is_some() && !claims.is_staff {
            return Err(AppError::Authorization(
                "Only staff can filter borrowings by user".to_string(),
            ));
        }

        let rows = self.repository.borrowings.list(claims.scope(), query).await?;
        let ids: Vec<i32> = rows.iter().map(|(b, _)| b.id).collect();

        let mut payments: HashMap<i32, Vec<PaymentShort>> = HashMap::new();
        for payment in self.repository.payments.list_for_borrowings(&ids).await? {
            payments
                .entry(payment.borrowing_id)
                .or_default()
                .push(PaymentShort::from(&payment));
        }

        Ok(rows
            .into_iter()
            .map(|(borrowing, book)| {
                let own = payments.remove(&borrowing.id).unwrap_or_default();
                details(borrowing, book, own, today)
            })
            .collect())
    }

    pub async fn get(&self, id: i32, scope: Scope, today: NaiveDate) -> AppResult<BorrowingDetails> {
        let (borrowing, book) = self.repository.borrowings.get_with_book(id, scope).await?;
        let payments = self.payments_of(borrowing.id).await?;
        Ok(details(borrowing, book, payments, today))
    }

    /// Borrow a book for the caller.
    ///
    /// Runs in one transaction: the unpaid check, the inventory decrement,
    /// the borrowing row and its rental payment commit together. A provider
    /// failure while opening the session rolls everything back.
    ///
    /// The user row stays locked for the whole transaction, including the
    /// provider call, so two borrows of one user run one after the other.
    /// The book row is only locked by the final decrement.
    pub async fn borrow(
        &self,
        claims: &UserClaims,
        request: CreateBorrowing,
        today: NaiveDate,
    ) -> AppResult<BorrowingCreated> {
        rules::validate_expected_return_date(today, request.expected_return_date)?;

        let mut tx = self.repository.begin().await?;

        self.repository.users.lock(&mut *tx, claims.user_id).await?;
        if self
            .repository
            .payments
            .user_has_unpaid(&mut *tx, claims.user_id)
            .await?
        {
            return Err(AppError::UnpaidPayments(
                "You have unpaid payments. Please complete them before borrowing new books."
                    .to_string(),
            ));
        }

        let book = self
            .repository
            .books
            .get_in(&mut *tx, request.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", request.book_id)))?;
        rules::ensure_in_stock(&book.title, book.inventory)?;

        let borrowing = self
            .repository
            .borrowings
            .create(
                &mut *tx,
                book.id,
                claims.user_id,
                today,
                request.expected_return_date,
            )
            .await?;

        let fee = rules::rental_fee(book.daily_fee, today, borrowing.expected_return_date);
        let payment = self
            .create_payment(&mut *tx, &borrowing, &book, PaymentType::Payment, fee)
            .await?;

        let Some(book) = self.repository.books.take_copy(&mut *tx, book.id).await? else {
            // the last copy went to a concurrent borrow since the stock check
            return Err(AppError::OutOfStock(format!(
                "Book '{}' is out of stock, please retry",
                book.title
            )));
        };

        tx.commit().await?;

        tracing::info!(
            borrowing_id = borrowing.id,
            book_id = book.id,
            user_id = claims.user_id,
            "Book borrowed"
        );
        self.notifications.notify(new_borrowing_message(
            &claims.sub,
            &book.title,
            borrowing.expected_return_date,
        ));

        let payment_details = PaymentDetails::new(payment.clone(), short(&borrowing, &book));
        Ok(BorrowingCreated {
            borrowing: details(borrowing, book, vec![PaymentShort::from(&payment)], today),
            payment: payment_details,
        })
    }

    /// Return a borrowed book, charging a fine when it comes back late
    pub async fn return_borrowing(&self, id: i32, scope: Scope, today: NaiveDate) -> AppResult<ReturnResponse> {
        let mut tx = self.repository.begin().await?;

        let borrowing = self.repository.borrowings.lock(&mut *tx, id, scope).await?;
        rules::ensure_not_returned(&borrowing)?;

        let returned = self
            .repository
            .borrowings
            .mark_returned(&mut *tx, borrowing.id, today)
            .await?;
        let book = self
            .repository
            .books
            .put_back_copy(&mut *tx, returned.book_id)
            .await?;

        let fine = if rules::is_overdue(returned.expected_return_date, today) {
            self.fine_if_missing(&mut *tx, &returned, &book, today).await?
        } else {
            None
        };

        tx.commit().await?;

        tracing::info!(borrowing_id = returned.id, book_id = book.id, fined = fine.is_some(), "Book returned");

        let mut detail = format!("Book '{}' returned successfully.", book.title);
        if let Some(ref fine) = fine {
            detail.push_str(&format!(" A fine of {} is due.", fine.money_to_pay));
            if fine.awaits_session() {
                detail.push_str(" Its payment link opens once the rental payment is settled.");
            }
        }

        let payments = self.payments_of(returned.id).await?;
        let borrowing_short = short(&returned, &book);
        Ok(ReturnResponse {
            detail,
            fine: fine.map(|f| PaymentDetails::new(f, borrowing_short)),
            borrowing: details(returned, book, payments, today),
        })
    }

    /// Fine every open borrowing past its expected return date and report to staff.
    ///
    /// Safe to re-run: borrowings already fined are skipped. A borrowing that
    /// cannot be fined does not stop the others; the report is still sent and
    /// the scan ends with an error so the job is retried.
    pub async fn scan_overdue(&self, today: NaiveDate) -> AppResult<OverdueReport> {
        tracing::info!(%today, "Running overdue borrowings check");
        let overdue = self.repository.borrowings.find_overdue(today).await?;

        let mut fines_created = 0;
        let mut failures = 0;
        for item in overdue.iter().filter(|b| !b.has_fine) {
            match self.fine_overdue(item.id, today).await {
                Ok(true) => fines_created += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(borrowing_id = item.id, error = %e, "Could not fine overdue borrowing");
                    failures += 1;
                }
            }
        }

        self.notifications
            .notify_now(&overdue_report_message(today, &overdue))
            .await;

        let report = OverdueReport {
            overdue: overdue.len(),
            fines_created,
        };
        let active = self.repository.borrowings.count_active().await?;
        tracing::info!(
            active,
            overdue = report.overdue,
            fines_created = report.fines_created,
            failures,
            "Overdue check done"
        );

        if failures > 0 {
            return Err(AppError::Internal(format!(
                "{} of {} overdue borrowings could not be fined",
                failures, report.overdue
            )));
        }
        Ok(report)
    }

    /// Fine one borrowing under its row lock. Returns whether a fine was created.
    async fn fine_overdue(&self, id: i32, today: NaiveDate) -> AppResult<bool> {
        let mut tx = self.repository.begin().await?;

        let borrowing = self.repository.borrowings.lock(&mut *tx, id, Scope::All).await?;
        if borrowing.actual_return_date.is_some()
            || !rules::is_overdue(borrowing.expected_return_date, today)
        {
            return Ok(false);
        }

        let book = self
            .repository
            .books
            .get_in(&mut *tx, borrowing.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", borrowing.book_id)))?;

        let created = self.fine_if_missing(&mut *tx, &borrowing, &book, today).await?;
        tx.commit().await?;
        Ok(created.is_some())
    }

    /// Caller must hold the borrowing row lock
    async fn fine_if_missing(
        &self,
        conn: &mut PgConnection,
        borrowing: &Borrowing,
        book: &Book,
        today: NaiveDate,
    ) -> AppResult<Option<Payment>> {
        if self
            .repository
            .payments
            .exists_for(&mut *conn, borrowing.id, PaymentType::Fine)
            .await?
        {
            return Ok(None);
        }

        let amount = rules::fine_amount(
            book.daily_fee,
            borrowing.expected_return_date,
            today,
            self.fine_multiplier,
        );
        // one open checkout per borrowing: while the rental session is
        // payable the fine waits without a session of its own
        let deferred = rules::to_minor_units(amount)? > 0
            && self
                .repository
                .payments
                .has_open_session(&mut *conn, borrowing.id)
                .await?;

        let fine = if deferred {
            self.repository
                .payments
                .create(
                    conn,
                    &NewPayment {
                        borrowing_id: borrowing.id,
                        payment_type: PaymentType::Fine,
                        money_to_pay: amount,
                        session: None,
                        awaiting_session: true,
                    },
                )
                .await?
        } else {
            self.create_payment(conn, borrowing, book, PaymentType::Fine, amount)
                .await?
        };
        tracing::info!(
            borrowing_id = borrowing.id,
            payment_id = fine.id,
            amount = %amount,
            deferred,
            "Fine created"
        );
        Ok(Some(fine))
    }

    async fn create_payment(
        &self,
        conn: &mut PgConnection,
        borrowing: &Borrowing,
        book: &Book,
        payment_type: PaymentType,
        amount: Decimal,
    ) -> AppResult<Payment> {
        let session = self
            .checkout
            .open_session(borrowing.id, &book.title, payment_type, amount)
            .await?;

        self.repository
            .payments
            .create(
                conn,
                &NewPayment {
                    borrowing_id: borrowing.id,
                    payment_type,
                    money_to_pay: amount,
                    session,
                    awaiting_session: false,
                },
            )
            .await
    }

    async fn payments_of(&self, borrowing_id: i32) -> AppResult<Vec<PaymentShort>> {
        let payments = self
            .repository
            .payments
            .list_for_borrowings(&[borrowing_id])
            .await?;
        Ok(payments.iter().map(PaymentShort::from).collect())
    }
}
