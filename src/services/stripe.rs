//! Payment gateway port and its Stripe Checkout implementation

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use crate::{
    config::StripeConfig,
    error::{AppError, AppResult},
};

/// Checkout session to open with the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Amount in minor units (cents)
    pub amount_cents: i64,
    pub currency: String,
    /// Line item label shown on the hosted page
    pub product_name: String,
    /// Our own reference, echoed back by the provider
    pub reference: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Unknown,
}

/// Subset of a Stripe checkout session object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub amount_total: Option<i64>,
    pub status: Option<SessionStatus>,
    pub payment_status: SessionPaymentStatus,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == SessionPaymentStatus::Paid
    }

    pub fn is_expired(&self) -> bool {
        self.status == Some(SessionStatus::Expired)
    }
}

/// Outbound payment provider operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> AppResult<CheckoutSession>;

    async fn retrieve_session(&self, session_id: &str) -> AppResult<CheckoutSession>;
}

/// Stripe Checkout API client
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl StripeClient {
    pub fn new(http: Client, config: &StripeConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v1{}", self.api_base, path)
    }

    async fn handle_response(&self, response: reqwest::Response) -> AppResult<CheckoutSession> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| AppError::PaymentGateway(format!("Invalid Stripe response: {}", e)));
        }

        let message = match response.json::<StripeErrorBody>().await {
            Ok(body) => format!(
                "{}: {}",
                body.error.kind.unwrap_or_else(|| "error".to_string()),
                body.error.message.unwrap_or_default()
            ),
            Err(_) => "unreadable error body".to_string(),
        };
        Err(AppError::PaymentGateway(format!(
            "Stripe returned {}: {}",
            status.as_u16(),
            message
        )))
    }
}

fn checkout_form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
    vec![
        ("mode", "payment".to_string()),
        ("payment_method_types[0]", "card".to_string()),
        ("line_items[0][quantity]", "1".to_string()),
        ("line_items[0][price_data][currency]", request.currency.clone()),
        ("line_items[0][price_data][unit_amount]", request.amount_cents.to_string()),
        (
            "line_items[0][price_data][product_data][name]",
            request.product_name.clone(),
        ),
        ("client_reference_id", request.reference.clone()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
    ]
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> AppResult<CheckoutSession> {
        let response = self
            .http
            .post(self.api_url("/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(&request))
            .send()
            .await
            .map_err(|e| AppError::PaymentGateway(format!("Stripe request failed: {}", e)))?;

        let session = self.handle_response(response).await?;
        tracing::info!(
            session_id = %session.id,
            reference = %request.reference,
            amount_cents = request.amount_cents,
            "Created checkout session"
        );
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> AppResult<CheckoutSession> {
        validate_session_id(session_id)?;
        let response = self
            .http
            .get(self.api_url(&format!("/checkout/sessions/{}", session_id)))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::PaymentGateway(format!("Stripe request failed: {}", e)))?;

        self.handle_response(response).await
    }
}

/// Webhook event envelope
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// The checkout session carried by `checkout.session.*` events
    pub fn checkout_session(&self) -> Option<CheckoutSession> {
        if !self.event_type.starts_with("checkout.session.") {
            return None;
        }
        serde_json::from_value(self.data.object.clone()).ok()
    }
}

/// Checkout session ids are interpolated into API paths, so only `cs_[A-Za-z0-9_]+` is accepted
pub fn validate_session_id(session_id: &str) -> AppResult<()> {
    let valid = session_id.strip_prefix("cs_").is_some_and(|rest| {
        !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    });

    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid session id '{}'", session_id)))
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`, as Stripe computes `v1` signatures
pub fn compute_signature(payload: &[u8], secret: &str, timestamp: i64) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
///
/// Any matching `v1` entry is accepted as long as the timestamp is within
/// `tolerance_secs` of `now`.
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> AppResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::InvalidSignature("Missing signature timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(AppError::InvalidSignature("No v1 signature found".to_string()));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(AppError::InvalidSignature(
            "Signature timestamp outside the tolerance window".to_string(),
        ));
    }

    for signature in &signatures {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(signature).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::InvalidSignature("Signature mismatch".to_string()))
}
