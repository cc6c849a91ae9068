//! Borrowing and billing rules
//!
//! Pure functions with no I/O. Services call these before touching the
//! database or the payment provider, so every state transition check lives
//! in one place.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{AppError, AppResult};
use crate::models::borrowing::{Borrowing, BorrowingStatus};

/// A book can only be lent while at least one copy is on the shelf
pub fn ensure_in_stock(title: &str, inventory: i32) -> AppResult<()> {
    if inventory <= 0 {
        return Err(AppError::OutOfStock(format!(
            "Book '{}' is out of stock",
            title
        )));
    }
    Ok(())
}

/// A borrowing is closed exactly once
pub fn ensure_not_returned(borrowing: &Borrowing) -> AppResult<()> {
    if borrowing.actual_return_date.is_some() {
        return Err(AppError::AlreadyReturned(format!(
            "Borrowing {} has already been returned",
            borrowing.id
        )));
    }
    Ok(())
}

/// The expected return date must lie strictly after the borrow date
pub fn validate_expected_return_date(borrow_date: NaiveDate, expected: NaiveDate) -> AppResult<()> {
    if expected <= borrow_date {
        return Err(AppError::Validation(format!(
            "expected_return_date must be after {}",
            borrow_date
        )));
    }
    Ok(())
}

/// Number of billed days for a rental, never less than one
pub fn rental_days(borrow_date: NaiveDate, expected: NaiveDate) -> i64 {
    (expected - borrow_date).num_days().max(1)
}

/// Fee charged up front when a book is borrowed
pub fn rental_fee(daily_fee: Decimal, borrow_date: NaiveDate, expected: NaiveDate) -> Decimal {
    round_money(daily_fee * Decimal::from(rental_days(borrow_date, expected)))
}

/// Days elapsed past the expected return date as of `on`
pub fn overdue_days(expected: NaiveDate, on: NaiveDate) -> i64 {
    (on - expected).num_days().max(0)
}

pub fn is_overdue(expected: NaiveDate, on: NaiveDate) -> bool {
    overdue_days(expected, on) > 0
}

/// Fine for a late return: daily fee times overdue days times multiplier
pub fn fine_amount(
    daily_fee: Decimal,
    expected: NaiveDate,
    on: NaiveDate,
    multiplier: Decimal,
) -> Decimal {
    round_money(daily_fee * Decimal::from(overdue_days(expected, on)) * multiplier)
}

/// Convert an amount into the provider's integer minor units (cents)
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::Internal(format!("Amount {} cannot be charged", amount)))
}

/// Status of a borrowing as of `today`
pub fn borrowing_status(borrowing: &Borrowing, today: NaiveDate) -> BorrowingStatus {
    if borrowing.actual_return_date.is_some() {
        BorrowingStatus::Returned
    } else if is_overdue(borrowing.expected_return_date, today) {
        BorrowingStatus::Overdue
    } else {
        BorrowingStatus::Active
    }
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
