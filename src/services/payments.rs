//! Payment sessions, provider callbacks and reconciliation

use std::sync::Arc;

use rust_decimal::Decimal;

use super::stripe::{
    validate_session_id, verify_stripe_signature, CheckoutRequest, CheckoutSession, PaymentGateway,
    WebhookEvent,
};
use crate::{
    config::StripeConfig,
    error::{AppError, AppResult},
    models::{
        payment::{
            CallbackResponse, PaidTransition, Payment, PaymentDetails, PaymentShort, PaymentStatus,
            PaymentType, RenewResponse, SessionRef,
        },
        user::Scope,
    },
    repository::Repository,
    rules,
};

/// Opens provider checkout sessions for borrowings
#[derive(Clone)]
pub struct Checkout {
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    public_url: String,
}

impl Checkout {
    pub fn new(gateway: Arc<dyn PaymentGateway>, stripe: &StripeConfig, public_url: &str) -> Self {
        Self {
            gateway,
            currency: stripe.currency.clone(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn success_url(&self) -> String {
        format!(
            "{}/api/v1/payments/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.public_url
        )
    }

    pub fn cancel_url(&self) -> String {
        format!("{}/api/v1/payments/cancel", self.public_url)
    }

    /// Open a session charging `amount` for a borrowing.
    ///
    /// Zero amounts need no session and return `None`.
    pub async fn open_session(
        &self,
        borrowing_id: i32,
        book_title: &str,
        payment_type: PaymentType,
        amount: Decimal,
    ) -> AppResult<Option<SessionRef>> {
        let amount_cents = rules::to_minor_units(amount)?;
        if amount_cents == 0 {
            return Ok(None);
        }

        let label = match payment_type {
            PaymentType::Payment => "Payment",
            PaymentType::Fine => "Fine",
        };
        let request = CheckoutRequest {
            amount_cents,
            currency: self.currency.clone(),
            product_name: format!("{} for borrowing #{} - {}", label, borrowing_id, book_title),
            reference: format!("borrowing-{}-{}", borrowing_id, payment_type.as_str().to_lowercase()),
            success_url: self.success_url(),
            cancel_url: self.cancel_url(),
        };

        let session = self.gateway.create_checkout_session(request).await?;
        let url = session.url.ok_or_else(|| {
            AppError::PaymentGateway(format!("Session {} has no checkout URL", session.id))
        })?;
        Ok(Some(SessionRef { id: session.id, url }))
    }

    pub async fn retrieve(&self, session_id: &str) -> AppResult<CheckoutSession> {
        self.gateway.retrieve_session(session_id).await
    }
}

/// Outcome of opening a new session for an existing payment
enum Reopen {
    Opened(Payment),
    /// Another session of the borrowing is still open
    Blocked,
    /// Paid or renewed in the meantime
    Stale,
}

#[derive(Clone)]
pub struct PaymentsService {
    repository: Repository,
    checkout: Checkout,
    webhook_secret: String,
    webhook_tolerance_secs: i64,
}

impl PaymentsService {
    pub fn new(repository: Repository, checkout: Checkout, stripe: &StripeConfig) -> Self {
        Self {
            repository,
            checkout,
            webhook_secret: stripe.webhook_secret.clone(),
            webhook_tolerance_secs: stripe.webhook_tolerance_secs,
        }
    }

    pub async fn list(&self, scope: Scope) -> AppResult<Vec<PaymentShort>> {
        let payments = self.repository.payments.list(scope).await?;
        Ok(payments.iter().map(PaymentShort::from).collect())
    }

    pub async fn get(&self, id: i32, scope: Scope) -> AppResult<PaymentDetails> {
        let payment = self.repository.payments.get_by_id(id, scope).await?;
        let borrowing = self.repository.borrowings.get_short(payment.borrowing_id).await?;
        Ok(PaymentDetails::new(payment, borrowing))
    }

    /// Replace the session of an expired payment with a fresh one for the same amount.
    ///
    /// A fine still waiting for its first session can be opened the same way
    /// once the borrowing has no other open session.
    pub async fn renew(&self, id: i32, scope: Scope) -> AppResult<RenewResponse> {
        let payment = self.repository.payments.get_by_id(id, scope).await?;
        let first_session = payment.awaits_session();
        if payment.status != PaymentStatus::Expired && !first_session {
            return Err(AppError::Validation(format!(
                "Only expired payments can be renewed, payment {} is {}",
                payment.id, payment.status
            )));
        }

        let renewed = match self.reopen_session(&payment).await? {
            Reopen::Opened(renewed) => renewed,
            Reopen::Blocked => {
                return Err(AppError::Conflict(format!(
                    "Borrowing {} already has an open payment session, settle it first",
                    payment.borrowing_id
                )))
            }
            Reopen::Stale => {
                return Err(AppError::Conflict(format!(
                    "Payment {} can no longer be renewed",
                    payment.id
                )))
            }
        };

        let (Some(session_id), Some(session_url)) = (renewed.session_id, renewed.session_url) else {
            return Err(AppError::Internal(format!("Payment {} has no session after renewal", renewed.id)));
        };
        Ok(RenewResponse {
            detail: if first_session {
                "Payment session opened".to_string()
            } else {
                "Payment session renewed".to_string()
            },
            session_id,
            session_url,
        })
    }

    /// Open a session for `payment` under the borrowing row lock, so that a
    /// borrowing never has two payable sessions at once
    async fn reopen_session(&self, payment: &Payment) -> AppResult<Reopen> {
        let mut tx = self.repository.begin().await?;

        self.repository
            .borrowings
            .lock(&mut *tx, payment.borrowing_id, Scope::All)
            .await?;
        if self
            .repository
            .payments
            .has_open_session(&mut *tx, payment.borrowing_id)
            .await?
        {
            return Ok(Reopen::Blocked);
        }

        let borrowing = self.repository.borrowings.get_short(payment.borrowing_id).await?;
        let session = self
            .checkout
            .open_session(
                borrowing.id,
                &borrowing.book_title,
                payment.payment_type,
                payment.money_to_pay,
            )
            .await?
            .ok_or_else(|| AppError::Validation("Nothing to pay for this payment".to_string()))?;

        let Some(renewed) = self
            .repository
            .payments
            .attach_session(&mut *tx, payment.id, &session)
            .await?
        else {
            return Ok(Reopen::Stale);
        };
        tx.commit().await?;

        tracing::info!(payment_id = renewed.id, session_id = %session.id, "Payment session opened");
        Ok(Reopen::Opened(renewed))
    }

    /// Open sessions for payments that were waiting on another session of
    /// their borrowing. Returns `(opened, failed)`.
    async fn open_waiting_sessions(&self, borrowing_id: Option<i32>) -> AppResult<(usize, usize)> {
        let waiting = self
            .repository
            .payments
            .list_waiting_for_session(borrowing_id)
            .await?;

        let mut opened = 0;
        let mut failed = 0;
        for payment in waiting {
            match self.reopen_session(&payment).await {
                Ok(Reopen::Opened(_)) => opened += 1,
                Ok(Reopen::Blocked | Reopen::Stale) => {}
                Err(e) => {
                    tracing::warn!(payment_id = payment.id, error = %e, "Could not open waiting payment session");
                    failed += 1;
                }
            }
        }
        Ok((opened, failed))
    }

    /// Move the payment of a session to PAID. `None` when no payment uses the session.
    ///
    /// A fine of the same borrowing that was waiting for this session to
    /// settle gets its own session right away; failures there are left to the sweep.
    pub async fn mark_session_paid(&self, session_id: &str) -> AppResult<Option<PaidTransition>> {
        if let Some(payment) = self.repository.payments.mark_paid(session_id).await? {
            tracing::info!(payment_id = payment.id, session_id, "Payment marked as paid");
            match self.open_waiting_sessions(Some(payment.borrowing_id)).await {
                Ok((_, 0)) => {}
                Ok((_, failed)) => {
                    tracing::warn!(borrowing_id = payment.borrowing_id, failed, "Waiting sessions not opened")
                }
                Err(e) => {
                    tracing::warn!(borrowing_id = payment.borrowing_id, error = %e, "Waiting sessions not opened")
                }
            }
            return Ok(Some(PaidTransition::Transitioned(payment)));
        }
        let existing = self.repository.payments.get_by_session(session_id).await?;
        Ok(existing.map(PaidTransition::AlreadyPaid))
    }

    /// Handle the provider's success redirect.
    ///
    /// The session is fetched from the provider, so a forged query string
    /// cannot mark anything as paid.
    pub async fn confirm_success(&self, session_id: &str) -> AppResult<CallbackResponse> {
        validate_session_id(session_id)?;
        let session = self.checkout.retrieve(session_id).await?;

        if !session.is_paid() {
            let payment = self.repository.payments.get_by_session(&session.id).await?;
            return Ok(CallbackResponse {
                result: format!("session number {} is not paid yet", session.id),
                status: payment.map(|p| p.status),
            });
        }

        match self.mark_session_paid(&session.id).await? {
            Some(PaidTransition::Transitioned(payment)) => Ok(CallbackResponse {
                result: format!(
                    "session number {} was successfully paid. Thank you for using our service",
                    session.id
                ),
                status: Some(payment.status),
            }),
            Some(PaidTransition::AlreadyPaid(payment)) => Ok(CallbackResponse {
                result: format!("session number {} has already been paid", session.id),
                status: Some(payment.status),
            }),
            None => Err(AppError::NotFound(format!(
                "No payment found for session {}",
                session.id
            ))),
        }
    }

    /// Verify and apply a provider webhook event
    pub async fn handle_webhook(&self, payload: &[u8], signature: Option<&str>, now: i64) -> AppResult<()> {
        if self.webhook_secret.is_empty() {
            tracing::warn!("Webhook received but no webhook secret is configured");
            return Err(AppError::InvalidSignature("Webhooks are not configured".to_string()));
        }
        let signature = signature
            .ok_or_else(|| AppError::InvalidSignature("Missing Stripe-Signature header".to_string()))?;
        verify_stripe_signature(
            payload,
            signature,
            &self.webhook_secret,
            self.webhook_tolerance_secs,
            now,
        )?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

        let Some(session) = event.checkout_session() else {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(());
        };

        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                if !session.is_paid() {
                    tracing::debug!(session_id = %session.id, "Session completed without payment yet");
                    return Ok(());
                }
                if self.mark_session_paid(&session.id).await?.is_none() {
                    tracing::warn!(event_id = %event.id, session_id = %session.id, "Webhook for unknown session");
                }
            }
            "checkout.session.expired" => {
                if let Some(payment) = self.repository.payments.mark_expired(&session.id).await? {
                    tracing::info!(payment_id = payment.id, session_id = %session.id, "Payment session expired");
                }
            }
            other => {
                tracing::debug!(event_id = %event.id, event_type = other, "Ignoring webhook event");
            }
        }
        Ok(())
    }

    /// Reconcile pending payments with the provider.
    ///
    /// Expired sessions move their payment to EXPIRED; sessions paid without
    /// a callback reaching us move to PAID. Payments waiting for a session get
    /// one when their borrowing has none open. Returns the number of expired payments.
    pub async fn sweep_expired_sessions(&self) -> AppResult<usize> {
        let pending = self.repository.payments.list_pending_with_session().await?;
        let mut expired = 0;
        let mut failures = 0;

        for payment in pending {
            let Some(session_id) = payment.session_id.as_deref() else {
                continue;
            };
            let session = match self.checkout.retrieve(session_id).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(payment_id = payment.id, error = %e, "Could not retrieve session");
                    failures += 1;
                    continue;
                }
            };

            if session.is_paid() {
                self.mark_session_paid(session_id).await?;
            } else if session.is_expired()
                && self.repository.payments.mark_expired(session_id).await?.is_some()
            {
                tracing::info!(payment_id = payment.id, session_id, "Payment session expired");
                expired += 1;
            }
        }

        let (opened, failed) = self.open_waiting_sessions(None).await?;
        if opened > 0 {
            tracing::info!(opened, "Opened sessions for waiting payments");
        }
        failures += failed;

        if failures > 0 {
            return Err(AppError::PaymentGateway(format!(
                "{} session lookups or openings failed during sweep",
                failures
            )));
        }
        Ok(expired)
    }
}
