//! Payment model and related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

use super::borrowing::BorrowingShort;
use super::pg_text_enum;

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Expired => "EXPIRED",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

pg_text_enum!(PaymentStatus);

/// What the payment is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentType {
    /// Rental fee charged when the book is borrowed
    Payment,
    /// Charged for a late return
    Fine,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Payment => "PAYMENT",
            PaymentType::Fine => "FINE",
        }
    }
}

impl std::str::FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PAYMENT" => Ok(PaymentType::Payment),
            "FINE" => Ok(PaymentType::Fine),
            _ => Err(format!("Invalid payment type: {}", s)),
        }
    }
}

pg_text_enum!(PaymentType);

/// Payment row from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i32,
    pub status: PaymentStatus,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    pub borrowing_id: i32,
    pub session_url: Option<String>,
    pub session_id: Option<String>,
    pub money_to_pay: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Pending but no checkout opened yet
    pub fn awaits_session(&self) -> bool {
        self.status == PaymentStatus::Pending && self.session_id.is_none()
    }
}

/// Payment as shown in lists
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentShort {
    pub id: i32,
    pub status: PaymentStatus,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    #[schema(value_type = String, example = "10.00")]
    pub money_to_pay: Decimal,
}

impl From<&Payment> for PaymentShort {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id,
            status: p.status,
            payment_type: p.payment_type,
            money_to_pay: p.money_to_pay,
        }
    }
}

/// Full payment view with session and borrowing
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentDetails {
    pub id: i32,
    pub status: PaymentStatus,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    #[schema(value_type = String, example = "10.00")]
    pub money_to_pay: Decimal,
    pub session_url: Option<String>,
    pub session_id: Option<String>,
    pub borrowing: BorrowingShort,
}

impl PaymentDetails {
    pub fn new(payment: Payment, borrowing: BorrowingShort) -> Self {
        Self {
            id: payment.id,
            status: payment.status,
            payment_type: payment.payment_type,
            money_to_pay: payment.money_to_pay,
            session_url: payment.session_url,
            session_id: payment.session_id,
            borrowing,
        }
    }
}

/// Payment to insert; `session` is absent for zero-amount payments
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub borrowing_id: i32,
    pub payment_type: PaymentType,
    pub money_to_pay: Decimal,
    pub session: Option<SessionRef>,
    /// Stays PENDING without a session until the borrowing's open checkout settles
    pub awaiting_session: bool,
}

/// Provider checkout session reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub id: String,
    pub url: String,
}

/// Query string of the provider success redirect
#[derive(Debug, Deserialize, IntoParams)]
pub struct SuccessQuery {
    pub session_id: Option<String>,
}

/// Response to provider redirects
#[derive(Debug, Serialize, ToSchema)]
pub struct CallbackResponse {
    pub result: String,
    pub status: Option<PaymentStatus>,
}

/// Response to a session renewal
#[derive(Debug, Serialize, ToSchema)]
pub struct RenewResponse {
    pub detail: String,
    pub session_id: String,
    pub session_url: String,
}

/// Outcome of marking a payment as paid
#[derive(Debug, Clone)]
pub enum PaidTransition {
    /// The payment moved from PENDING/EXPIRED to PAID on this call
    Transitioned(Payment),
    /// The payment had already been marked as paid
    AlreadyPaid(Payment),
}

impl PaidTransition {
    pub fn payment(&self) -> &Payment {
        match self {
            PaidTransition::Transitioned(p) | PaidTransition::AlreadyPaid(p) => p,
        }
    }
}
