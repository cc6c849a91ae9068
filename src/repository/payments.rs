//! Payments repository for database operations

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        payment::{NewPayment, Payment, PaymentStatus, PaymentType, SessionRef},
        user::Scope,
    },
};

#[derive(Clone)]
pub struct PaymentsRepository {
    pool: Pool<Postgres>,
}

impl PaymentsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn not_found(id: i32) -> AppError {
        AppError::NotFound(format!("Payment with id {} not found", id))
    }

    /// Get a payment, restricted to payments of the caller's borrowings
    pub async fn get_by_id(&self, id: i32, scope: Scope) -> AppResult<Payment> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT p.* FROM payments p
            JOIN borrowings br ON br.id = p.borrowing_id
            WHERE p.id = $1 AND ($2::int IS NULL OR br.user_id = $2)
            "#,
        )
        .bind(id)
        .bind(scope.owner_id())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Self::not_found(id))
    }

    pub async fn get_by_session(&self, session_id: &str) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// List payments visible in `scope`
    pub async fn list(&self, scope: Scope) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT p.* FROM payments p
            JOIN borrowings br ON br.id = p.borrowing_id
            WHERE ($1::int IS NULL OR br.user_id = $1)
            ORDER BY p.id DESC
            "#,
        )
        .bind(scope.owner_id())
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Payments attached to any of the given borrowings
    pub async fn list_for_borrowings(&self, borrowing_ids: &[i32]) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE borrowing_id = ANY($1) ORDER BY id",
        )
        .bind(borrowing_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Pending payments that have a provider session to check
    pub async fn list_pending_with_session(&self) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE status = 'PENDING' AND session_id IS NOT NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Pending payments still waiting for a checkout session, optionally for one borrowing
    pub async fn list_waiting_for_session(&self, borrowing_id: Option<i32>) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE status = 'PENDING' AND session_id IS NULL
              AND ($1::int IS NULL OR borrowing_id = $1)
            ORDER BY id
            "#,
        )
        .bind(borrowing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Whether a checkout session of this borrowing is still open for payment
    pub async fn has_open_session(&self, conn: &mut PgConnection, borrowing_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM payments
                WHERE borrowing_id = $1 AND status = 'PENDING' AND session_id IS NOT NULL
            )
            "#,
        )
        .bind(borrowing_id)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// Whether the user still owes money on any borrowing
    pub async fn user_has_unpaid(&self, conn: &mut PgConnection, user_id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM payments p
                JOIN borrowings br ON br.id = p.borrowing_id
                WHERE br.user_id = $1 AND p.status <> 'PAID'
            )
            "#,
        )
        .bind(user_id)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    pub async fn exists_for(
        &self,
        conn: &mut PgConnection,
        borrowing_id: i32,
        payment_type: PaymentType,
    ) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE borrowing_id = $1 AND type = $2)",
        )
        .bind(borrowing_id)
        .bind(payment_type)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// Insert a payment. Zero-amount payments carry no session and are settled immediately.
    pub async fn create(&self, conn: &mut PgConnection, payment: &NewPayment) -> AppResult<Payment> {
        let status = if payment.session.is_some() || payment.awaiting_session {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Paid
        };

        let created = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (status, type, borrowing_id, session_url, session_id, money_to_pay)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(payment.payment_type)
        .bind(payment.borrowing_id)
        .bind(payment.session.as_ref().map(|s| s.url.as_str()))
        .bind(payment.session.as_ref().map(|s| s.id.as_str()))
        .bind(payment.money_to_pay)
        .fetch_one(conn)
        .await?;

        Ok(created)
    }

    /// Mark the payment of a session as paid.
    ///
    /// Returns `None` when no row changed, i.e. the payment is already paid
    /// or the session is unknown.
    pub async fn mark_paid(&self, session_id: &str) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET status = 'PAID', updated_at = NOW()
            WHERE session_id = $1 AND status <> 'PAID'
            RETURNING *
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    /// Mark the payment of a session as expired if it is still pending
    pub async fn mark_expired(&self, session_id: &str) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET status = 'EXPIRED', updated_at = NOW()
            WHERE session_id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    /// Attach a fresh session to an expired payment, or to a pending one that
    /// never had a session, and make it pending.
    ///
    /// Returns `None` if the payment no longer qualifies (renewed concurrently
    /// or paid in the meantime).
    pub async fn attach_session(
        &self,
        conn: &mut PgConnection,
        id: i32,
        session: &SessionRef,
    ) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET session_id = $2, session_url = $3, status = 'PENDING', updated_at = NOW()
            WHERE id = $1
              AND (status = 'EXPIRED' OR (status = 'PENDING' AND session_id IS NULL))
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&session.id)
        .bind(&session.url)
        .fetch_optional(conn)
        .await?;
        Ok(payment)
    }

    /// Count payments for one borrowing and type (used by tests and diagnostics)
    pub async fn count_for(&self, borrowing_id: i32, payment_type: PaymentType) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE borrowing_id = $1 AND type = $2",
        )
        .bind(borrowing_id)
        .bind(payment_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
