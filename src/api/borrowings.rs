//! Borrowing endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    error::AppResult,
    models::borrowing::{
        BorrowingCreated, BorrowingDetails, BorrowingQuery, CreateBorrowing, ReturnResponse,
    },
    AppState,
};

use super::AuthenticatedUser;

/// List borrowings
#[utoipa::path(
    get,
    path = "/borrowings",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(BorrowingQuery),
    responses(
        (status = 200, description = "Borrowings visible to the caller", body = Vec<BorrowingDetails>),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse),
        (status = 403, description = "user_id filter is staff only", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_borrowings(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<BorrowingQuery>,
) -> AppResult<Json<Vec<BorrowingDetails>>> {
    let borrowings = state
        .services
        .borrowings
        .list(&claims, &query, Utc::now().date_naive())
        .await?;
    Ok(Json(borrowings))
}

/// Get a borrowing
#[utoipa::path(
    get,
    path = "/borrowings/{id}",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Borrowing ID")
    ),
    responses(
        (status = 200, description = "Borrowing details", body = BorrowingDetails),
        (status = 404, description = "Borrowing not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_borrowing(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowingDetails>> {
    let borrowing = state
        .services
        .borrowings
        .get(id, claims.scope(), Utc::now().date_naive())
        .await?;
    Ok(Json(borrowing))
}

/// Borrow a book
#[utoipa::path(
    post,
    path = "/borrowings",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    request_body = CreateBorrowing,
    responses(
        (status = 201, description = "Borrowing created with its rental payment", body = BorrowingCreated),
        (status = 400, description = "Invalid input", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Book out of stock", body = crate::error::ErrorResponse),
        (status = 422, description = "Caller has unpaid payments", body = crate::error::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_borrowing(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateBorrowing>,
) -> AppResult<(StatusCode, Json<BorrowingCreated>)> {
    request.validate()?;

    let created = state
        .services
        .borrowings
        .borrow(&claims, request, Utc::now().date_naive())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/borrowings/{id}/return",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Borrowing ID")
    ),
    responses(
        (status = 200, description = "Book returned; includes the fine when late", body = ReturnResponse),
        (status = 404, description = "Borrowing not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Already returned", body = crate::error::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_borrowing(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ReturnResponse>> {
    let response = state
        .services
        .borrowings
        .return_borrowing(id, claims.scope(), Utc::now().date_naive())
        .await?;
    Ok(Json(response))
}
