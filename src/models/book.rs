//! Book model and related types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use super::pg_text_enum;

/// Largest daily fee the NUMERIC(5, 2) column can hold
const MAX_DAILY_FEE: Decimal = Decimal::from_parts(99999, 0, 0, false, 2);

/// Cover type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoverType {
    Soft,
    Hard,
}

impl CoverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverType::Soft => "SOFT",
            CoverType::Hard => "HARD",
        }
    }
}

impl std::str::FromStr for CoverType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SOFT" => Ok(CoverType::Soft),
            "HARD" => Ok(CoverType::Hard),
            _ => Err(format!("Invalid cover type: {}", s)),
        }
    }
}

pg_text_enum!(CoverType);

/// Book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub cover: CoverType,
    /// Copies currently on the shelf
    pub inventory: i32,
    #[schema(value_type = String, example = "1.50")]
    pub daily_fee: Decimal,
}

fn validate_daily_fee(fee: &Decimal) -> Result<(), ValidationError> {
    if fee.is_sign_negative() || *fee > MAX_DAILY_FEE || fee.scale() > 2 {
        let mut err = ValidationError::new("daily_fee");
        err.message = Some("Daily fee must be between 0.00 and 999.99 with at most 2 decimals".into());
        return Err(err);
    }
    Ok(())
}

/// Create (or fully replace) a book
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 255, message = "Author must be 1-255 characters"))]
    pub author: String,
    pub cover: CoverType,
    #[validate(range(min = 0, message = "Inventory cannot be negative"))]
    pub inventory: i32,
    #[validate(custom(function = "validate_daily_fee"))]
    #[schema(value_type = String, example = "1.50")]
    pub daily_fee: Decimal,
}

/// Partial book update (PATCH)
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Author must be 1-255 characters"))]
    pub author: Option<String>,
    pub cover: Option<CoverType>,
    #[validate(range(min = 0, message = "Inventory cannot be negative"))]
    pub inventory: Option<i32>,
    #[validate(custom(function = "validate_daily_fee"))]
    #[schema(value_type = Option<String>, example = "1.50")]
    pub daily_fee: Option<Decimal>,
}

impl From<CreateBook> for UpdateBook {
    fn from(book: CreateBook) -> Self {
        Self {
            title: Some(book.title),
            author: Some(book.author),
            cover: Some(book.cover),
            inventory: Some(book.inventory),
            daily_fee: Some(book.daily_fee),
        }
    }
}

/// Book query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct BookQuery {
    /// Case-insensitive title search
    pub title: Option<String>,
    /// Case-insensitive author search
    pub author: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
