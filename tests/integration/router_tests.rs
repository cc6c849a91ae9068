//! Router tests exercising auth, validation and signature paths that stop
//! before the database

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use library_server::{
    api,
    models::user::TokenType,
    repository::Repository,
    services::{redis::RedisService, stripe::compute_signature, Services},
};

use crate::support::{self, Harness, WEBHOOK_SECRET};

fn app(harness: &Harness) -> Router {
    api::router(harness.state()).expect("router")
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let mut req = builder.body(body).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    req
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::offline();
    let response = app(&harness)
        .oneshot(request(Method::GET, "/api/v1/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let harness = Harness::offline();
    let response = app(&harness)
        .oneshot(request(Method::GET, "/api-docs/openapi.json", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["paths"]["/borrowings"].is_object());
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let harness = Harness::offline();
    for (method, uri) in [
        (Method::GET, "/api/v1/borrowings"),
        (Method::GET, "/api/v1/payments"),
        (Method::GET, "/api/v1/users/me"),
        (Method::POST, "/api/v1/borrowings/1/return"),
    ] {
        let response = app(&harness)
            .oneshot(request(method, uri, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let harness = Harness::offline();
    let refresh = support::token(1, false, TokenType::Refresh);

    let response = app(&harness)
        .oneshot(request(Method::GET, "/api/v1/users/me", Some(&refresh), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["error"], "NotAuthorized");
}

#[tokio::test]
async fn test_book_writes_are_staff_only() {
    let harness = Harness::offline();
    let reader = support::token(2, false, TokenType::Access);
    let book = json!({
        "title": "Dune",
        "author": "Frank Herbert",
        "cover": "HARD",
        "inventory": 2,
        "daily_fee": "1.50"
    });

    let response = app(&harness)
        .oneshot(request(Method::POST, "/api/v1/books", Some(&reader), Some(book)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app(&harness)
        .oneshot(request(Method::DELETE, "/api/v1/books/1", Some(&reader), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_book_reports_fields() {
    let harness = Harness::offline();
    let staff = support::token(1, true, TokenType::Access);
    let book = json!({
        "title": "",
        "author": "Frank Herbert",
        "cover": "SOFT",
        "inventory": -1,
        "daily_fee": "1.50"
    });

    let response = app(&harness)
        .oneshot(request(Method::POST, "/api/v1/books", Some(&staff), Some(book)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"], "BadValue");
    assert!(body["fields"]["title"].is_array());
    assert!(body["fields"]["inventory"].is_array());
}

#[tokio::test]
async fn test_user_filter_is_staff_only() {
    let harness = Harness::offline();
    let reader = support::token(2, false, TokenType::Access);

    let response = app(&harness)
        .oneshot(request(Method::GET, "/api/v1/borrowings?user_id=3", Some(&reader), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_borrow_rejects_past_return_date() {
    let harness = Harness::offline();
    let reader = support::token(2, false, TokenType::Access);
    let today = chrono::Utc::now().date_naive();

    let response = app(&harness)
        .oneshot(request(
            Method::POST,
            "/api/v1/borrowings",
            Some(&reader),
            Some(json!({"book_id": 1, "expected_return_date": today.to_string()})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.gateway.created(), 0);
}

#[tokio::test]
async fn test_success_redirect_requires_session_id() {
    let harness = Harness::offline();
    let response = app(&harness)
        .oneshot(request(Method::GET, "/api/v1/payments/success", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_success_redirect_rejects_malformed_session_id() {
    let harness = Harness::offline();
    let response = app(&harness)
        .oneshot(request(
            Method::GET,
            "/api/v1/payments/success?session_id=cs_1%2F..%2F..%2Fcustomers",
            None,
            None,
        ))
        .await
        .unwrap();
    // rejected before any provider lookup or database access
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_book_page_out_of_range() {
    let harness = Harness::offline();
    let response = app(&harness)
        .oneshot(request(
            Method::GET,
            "/api/v1/books?page=9223372036854775807&per_page=100",
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "BadValue");
}

#[tokio::test]
async fn test_services_from_config() {
    let config = support::test_config();
    let repository = Repository::new(Harness::offline_pool());
    let redis = RedisService::open(&config.redis.url).unwrap();
    assert!(Services::from_config(repository, &config, redis).is_ok());
}

#[tokio::test]
async fn test_cancel_redirect() {
    let harness = Harness::offline();
    let response = app(&harness)
        .oneshot(request(Method::GET, "/api/v1/payments/cancel", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["result"], "You can finish your payment later during 24 hours");
}

fn webhook(payload: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(sig) = signature {
        builder = builder.header("Stripe-Signature", sig);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

#[tokio::test]
async fn test_webhook_signature_is_enforced() {
    let harness = Harness::offline();
    let payload = r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1","payment_status":"paid"}}}"#;
    let now = chrono::Utc::now().timestamp();

    let response = app(&harness).oneshot(webhook(payload, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let forged = format!("t={},v1={}", now, "ab".repeat(32));
    let response = app(&harness).oneshot(webhook(payload, Some(forged))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "InvalidSignature");
}

#[tokio::test]
async fn test_signed_unrelated_event_is_acknowledged() {
    let harness = Harness::offline();
    let payload = r#"{"id":"evt_2","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
    let now = chrono::Utc::now().timestamp();
    let signature = compute_signature(payload.as_bytes(), WEBHOOK_SECRET, now).unwrap();

    let response = app(&harness)
        .oneshot(webhook(payload, Some(format!("t={},v1={}", now, signature))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_route_is_rate_limited() {
    let mut config = support::test_config();
    config.server.auth_rate_limit_replenish_secs = 60;
    config.server.auth_rate_limit_burst = 1;
    let harness = Harness::new(Harness::offline_pool(), config);
    let app = app(&harness);

    // Missing fields are rejected by the extractor, after the limiter counted the call
    let first = app
        .clone()
        .oneshot(request(Method::POST, "/api/v1/users/token", None, Some(json!({}))))
        .await
        .unwrap();
    assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);

    let second = app
        .oneshot(request(Method::POST, "/api/v1/users/token", None, Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
