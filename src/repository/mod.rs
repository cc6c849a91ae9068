//! Repository layer for database operations
//!
//! Read paths run on the pool. Methods taking `&mut PgConnection` are meant to
//! be called inside a transaction obtained from [`Repository::begin`], so a
//! borrow or return commits or rolls back as a whole.

pub mod books;
pub mod borrowings;
pub mod payments;
pub mod users;

use sqlx::{Pool, Postgres, Transaction};

use crate::error::{AppError, AppResult};

pub type Tx = Transaction<'static, Postgres>;

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub borrowings: borrowings::BorrowingsRepository,
    pub payments: payments::PaymentsRepository,
    pub users: users::UsersRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            borrowings: borrowings::BorrowingsRepository::new(pool.clone()),
            payments: payments::PaymentsRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn begin(&self) -> AppResult<Tx> {
        Ok(self.pool.begin().await?)
    }

    /// Round-trip to the database, used by the readiness probe
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Normalize page/per_page into (limit, offset)
pub(crate) fn page_bounds(page: Option<i64>, per_page: Option<i64>) -> AppResult<(i64, i64)> {
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    let page = page.unwrap_or(1).max(1);
    let offset = (page - 1)
        .checked_mul(per_page)
        .ok_or_else(|| AppError::Validation(format!("page {} is out of range", page)))?;
    Ok((per_page, offset))
}
