//! Payment endpoints and provider callbacks

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;

use crate::{
    error::{AppError, AppResult},
    models::payment::{CallbackResponse, PaymentDetails, PaymentShort, RenewResponse, SuccessQuery},
    AppState,
};

use super::AuthenticatedUser;

/// List payments
#[utoipa::path(
    get,
    path = "/payments",
    tag = "payments",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Payments visible to the caller", body = Vec<PaymentShort>),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_payments(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<PaymentShort>>> {
    let payments = state.services.payments.list(claims.scope()).await?;
    Ok(Json(payments))
}

/// Get payment details
#[utoipa::path(
    get,
    path = "/payments/{id}",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment details", body = PaymentDetails),
        (status = 404, description = "Payment not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_payment(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<PaymentDetails>> {
    let payment = state.services.payments.get(id, claims.scope()).await?;
    Ok(Json(payment))
}

/// Open a new checkout session for an expired payment
#[utoipa::path(
    post,
    path = "/payments/{id}/renew",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Session renewed", body = RenewResponse),
        (status = 400, description = "Payment is not expired", body = crate::error::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::error::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::error::ErrorResponse)
    )
)]
pub async fn renew_payment(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<RenewResponse>> {
    let renewed = state.services.payments.renew(id, claims.scope()).await?;
    Ok(Json(renewed))
}

/// Checkout success redirect
#[utoipa::path(
    get,
    path = "/payments/success",
    tag = "payments",
    params(SuccessQuery),
    responses(
        (status = 200, description = "Payment state after the redirect", body = CallbackResponse),
        (status = 400, description = "Missing session_id", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::error::ErrorResponse)
    )
)]
pub async fn payment_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> AppResult<Json<CallbackResponse>> {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("session_id query parameter is required".to_string()))?;

    let response = state.services.payments.confirm_success(&session_id).await?;
    Ok(Json(response))
}

/// Checkout cancel redirect
#[utoipa::path(
    get,
    path = "/payments/cancel",
    tag = "payments",
    responses(
        (status = 200, description = "Payment postponed", body = CallbackResponse)
    )
)]
pub async fn payment_cancel() -> Json<CallbackResponse> {
    Json(CallbackResponse {
        result: "You can finish your payment later during 24 hours".to_string(),
        status: None,
    })
}

/// Stripe webhook
#[utoipa::path(
    post,
    path = "/payments/webhook",
    tag = "payments",
    request_body(content = String, description = "Raw Stripe event", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Invalid signature or payload", body = crate::error::ErrorResponse)
    )
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok());

    state
        .services
        .payments
        .handle_webhook(&body, signature, Utc::now().timestamp())
        .await
        .inspect_err(|e| {
            if matches!(e, AppError::InvalidSignature(_)) {
                tracing::warn!("Webhook signature verification failed");
            }
        })?;

    Ok(StatusCode::OK)
}
