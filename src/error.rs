//! Error types for the library server

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

/// Machine-readable error codes returned alongside the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    Forbidden = 3,
    DbFailure = 4,
    NotFound = 5,
    BadValue = 6,
    Duplicate = 7,
    InUse = 8,
    OutOfStock = 9,
    AlreadyReturned = 10,
    UnpaidPayments = 11,
    InvalidSignature = 12,
    PaymentGatewayFailure = 13,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid fields: {0}")]
    InvalidFields(#[from] ValidationErrors),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Out of stock: {0}")]
    OutOfStock(String),

    #[error("Already returned: {0}")]
    AlreadyReturned(String),

    #[error("Unpaid payments: {0}")]
    UnpaidPayments(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
    /// Field-level validation messages, keyed by field name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, Vec<String>>>,
}

impl AppError {
    /// HTTP status, error code and client-facing message for this error
    fn parts(&self) -> (StatusCode, ErrorCode, String) {
        match self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::Forbidden, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, msg.clone()),
            AppError::Validation(msg) | AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::InvalidFields(_) => (
                StatusCode::BAD_REQUEST,
                ErrorCode::BadValue,
                "Invalid input".to_string(),
            ),
            AppError::Database(e) => database_error_parts(e),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
            AppError::OutOfStock(msg) => (StatusCode::CONFLICT, ErrorCode::OutOfStock, msg.clone()),
            AppError::AlreadyReturned(msg) => {
                (StatusCode::CONFLICT, ErrorCode::AlreadyReturned, msg.clone())
            }
            AppError::UnpaidPayments(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCode::UnpaidPayments,
                msg.clone(),
            ),
            AppError::InvalidSignature(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidSignature,
                msg.clone(),
            ),
            AppError::PaymentGateway(msg) => {
                tracing::warn!("Payment gateway error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorCode::PaymentGatewayFailure,
                    "Payment provider is unavailable, please retry later".to_string(),
                )
            }
        }
    }
}

/// Unique and foreign-key violations are client errors; anything else is logged
fn database_error_parts(e: &sqlx::Error) -> (StatusCode, ErrorCode, String) {
    if let Some(db_err) = e.as_database_error() {
        match db_err.code().as_deref() {
            Some("23505") => {
                return (
                    StatusCode::CONFLICT,
                    ErrorCode::Duplicate,
                    "Resource already exists".to_string(),
                )
            }
            Some("23503") => {
                return (
                    StatusCode::CONFLICT,
                    ErrorCode::InUse,
                    "Resource is referenced by other records".to_string(),
                )
            }
            _ => {}
        }
    }
    tracing::error!("Database error: {:?}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::DbFailure,
        "Database error".to_string(),
    )
}

fn field_messages(errors: &ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let fields = match &self {
            AppError::InvalidFields(errors) => Some(field_messages(errors)),
            _ => None,
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
            fields,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
