//! Borrowings repository for database operations

use chrono::NaiveDate;
use sqlx::{postgres::PgRow, PgConnection, Pool, Postgres, Row};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        borrowing::{Borrowing, BorrowingQuery, BorrowingShort, OverdueBorrowing},
        user::Scope,
    },
};

#[derive(Clone)]
pub struct BorrowingsRepository {
    pool: Pool<Postgres>,
}

const SELECT_WITH_BOOK: &str = r#"
    SELECT br.id, br.borrow_date, br.expected_return_date, br.actual_return_date,
           br.book_id, br.user_id,
           b.title AS book_title, b.author AS book_author, b.cover AS book_cover,
           b.inventory AS book_inventory, b.daily_fee AS book_daily_fee
    FROM borrowings br
    JOIN books b ON b.id = br.book_id
"#;

fn row_to_pair(row: &PgRow) -> (Borrowing, Book) {
    let borrowing = Borrowing {
        id: row.get("id"),
        borrow_date: row.get("borrow_date"),
        expected_return_date: row.get("expected_return_date"),
        actual_return_date: row.get("actual_return_date"),
        book_id: row.get("book_id"),
        user_id: row.get("user_id"),
    };
    let book = Book {
        id: row.get("book_id"),
        title: row.get("book_title"),
        author: row.get("book_author"),
        cover: row.get("book_cover"),
        inventory: row.get("book_inventory"),
        daily_fee: row.get("book_daily_fee"),
    };
    (borrowing, book)
}

impl BorrowingsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn not_found(id: i32) -> AppError {
        AppError::NotFound(format!("Borrowing with id {} not found", id))
    }

    /// Get a borrowing with its book, restricted to the caller's scope
    pub async fn get_with_book(&self, id: i32, scope: Scope) -> AppResult<(Borrowing, Book)> {
        let row = sqlx::query(&format!(
            "{} WHERE br.id = $1 AND ($2::int IS NULL OR br.user_id = $2)",
            SELECT_WITH_BOOK
        ))
        .bind(id)
        .bind(scope.owner_id())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Self::not_found(id))?;

        Ok(row_to_pair(&row))
    }

    /// List borrowings visible in `scope`, with optional user/active filters
    pub async fn list(&self, scope: Scope, query: &BorrowingQuery) -> AppResult<Vec<(Borrowing, Book)>> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE ($1::int IS NULL OR br.user_id = $1)
              AND ($2::int IS NULL OR br.user_id = $2)
              AND ($3::bool IS NULL OR (br.actual_return_date IS NULL) = $3)
            ORDER BY br.id DESC
            "#,
            SELECT_WITH_BOOK
        ))
        .bind(scope.owner_id())
        .bind(query.user_id)
        .bind(query.is_active)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_pair).collect())
    }

    /// Summary used inside payment details
    pub async fn get_short(&self, id: i32) -> AppResult<BorrowingShort> {
        sqlx::query_as::<_, BorrowingShort>(
            r#"
            SELECT br.id, br.book_id, b.title AS book_title, br.user_id,
                   br.borrow_date, br.expected_return_date, br.actual_return_date
            FROM borrowings br
            JOIN books b ON b.id = br.book_id
            WHERE br.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Self::not_found(id))
    }

    /// Insert a new borrowing
    pub async fn create(
        &self,
        conn: &mut PgConnection,
        book_id: i32,
        user_id: i32,
        borrow_date: NaiveDate,
        expected_return_date: NaiveDate,
    ) -> AppResult<Borrowing> {
        let borrowing = sqlx::query_as::<_, Borrowing>(
            r#"
            INSERT INTO borrowings (borrow_date, expected_return_date, book_id, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(borrow_date)
        .bind(expected_return_date)
        .bind(book_id)
        .bind(user_id)
        .fetch_one(conn)
        .await?;

        Ok(borrowing)
    }

    /// Lock a borrowing row for the rest of the transaction.
    ///
    /// Concurrent returns and overdue scans serialize on this lock, which is
    /// what keeps "returned once" and "one fine per borrowing" true.
    pub async fn lock(&self, conn: &mut PgConnection, id: i32, scope: Scope) -> AppResult<Borrowing> {
        sqlx::query_as::<_, Borrowing>(
            r#"
            SELECT * FROM borrowings
            WHERE id = $1 AND ($2::int IS NULL OR user_id = $2)
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(scope.owner_id())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Self::not_found(id))
    }

    /// Close a borrowing; only affects rows that are still open
    pub async fn mark_returned(
        &self,
        conn: &mut PgConnection,
        id: i32,
        returned_on: NaiveDate,
    ) -> AppResult<Borrowing> {
        sqlx::query_as::<_, Borrowing>(
            r#"
            UPDATE borrowings SET actual_return_date = $2
            WHERE id = $1 AND actual_return_date IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(returned_on)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| {
            AppError::AlreadyReturned(format!("Borrowing {} has already been returned", id))
        })
    }

    /// Open borrowings whose expected return date is before `today`
    pub async fn find_overdue(&self, today: NaiveDate) -> AppResult<Vec<OverdueBorrowing>> {
        let rows = sqlx::query_as::<_, OverdueBorrowing>(
            r#"
            SELECT br.id, u.email AS user_email, b.title AS book_title,
                   br.expected_return_date, b.daily_fee,
                   EXISTS(
                       SELECT 1 FROM payments p
                       WHERE p.borrowing_id = br.id AND p.type = 'FINE'
                   ) AS has_fine
            FROM borrowings br
            JOIN books b ON b.id = br.book_id
            JOIN users u ON u.id = br.user_id
            WHERE br.actual_return_date IS NULL AND br.expected_return_date < $1
            ORDER BY br.expected_return_date, br.id
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Count open borrowings
    pub async fn count_active(&self) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM borrowings WHERE actual_return_date IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
