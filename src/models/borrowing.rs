//! Borrowing model and related types

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::book::Book;
use super::payment::{PaymentDetails, PaymentShort};

/// Borrowing row from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Borrowing {
    pub id: i32,
    pub borrow_date: NaiveDate,
    pub expected_return_date: NaiveDate,
    pub actual_return_date: Option<NaiveDate>,
    pub book_id: i32,
    pub user_id: i32,
}

/// Status derived from the borrowing dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum BorrowingStatus {
    Active,
    Returned,
    Overdue,
}

/// Borrowing with book and payments for display
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BorrowingDetails {
    pub id: i32,
    pub borrow_date: NaiveDate,
    pub expected_return_date: NaiveDate,
    pub actual_return_date: Option<NaiveDate>,
    pub status: BorrowingStatus,
    pub book: Book,
    pub user_id: i32,
    pub payments: Vec<PaymentShort>,
}

/// Borrowing summary embedded in payment details
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowingShort {
    pub id: i32,
    pub book_id: i32,
    pub book_title: String,
    pub user_id: i32,
    pub borrow_date: NaiveDate,
    pub expected_return_date: NaiveDate,
    pub actual_return_date: Option<NaiveDate>,
}

/// Open borrowing past its expected return date, as seen by the overdue scan
#[derive(Debug, Clone, FromRow)]
pub struct OverdueBorrowing {
    pub id: i32,
    pub user_email: String,
    pub book_title: String,
    pub expected_return_date: NaiveDate,
    pub daily_fee: Decimal,
    pub has_fine: bool,
}

/// Create borrowing request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBorrowing {
    #[validate(range(min = 1, message = "Invalid book id"))]
    pub book_id: i32,
    /// Must be after today
    pub expected_return_date: NaiveDate,
}

/// Borrowing list filters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct BorrowingQuery {
    /// Filter by user (staff only)
    pub user_id: Option<i32>,
    /// `true`: only open borrowings, `false`: only returned ones
    pub is_active: Option<bool>,
}

/// Borrowing creation result, including the rental payment to settle
#[derive(Debug, Serialize, ToSchema)]
pub struct BorrowingCreated {
    pub borrowing: BorrowingDetails,
    pub payment: PaymentDetails,
}

/// Return result; `fine` is set when the book came back late
#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnResponse {
    pub detail: String,
    pub borrowing: BorrowingDetails,
    pub fine: Option<PaymentDetails>,
}

/// Outcome of one overdue scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverdueReport {
    pub overdue: usize,
    pub fines_created: usize,
}
