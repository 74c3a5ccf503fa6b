use async_trait::async_trait;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{debug, warn};

use crate::database::error::StoreResult;
use crate::database::repository::{
    Book, BookCatalog, InventoryLedger, ReservationOutcome, StockReservation,
};

#[derive(Debug, Clone, FromRow)]
struct BookRow {
    id: i64,
    title: String,
    price: sqlx::types::BigDecimal,
    quantity: i32,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            id: row.id,
            title: row.title,
            price: row.price,
            quantity: row.quantity,
        }
    }
}

/// Catalog reads and the stock ledger over the `books` table.
pub struct BookRepository {
    pool: PgPool,
}

impl BookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// The predicate lives in the write so two buyers can never both take the last copies.
async fn conditional_decrement(
    conn: &mut PgConnection,
    book_id: i64,
    quantity: i32,
) -> StoreResult<bool> {
    let result = sqlx::query(
        "UPDATE books
         SET quantity = quantity - $2
         WHERE id = $1 AND quantity >= $2 AND $2 > 0",
    )
    .bind(book_id)
    .bind(quantity)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl BookCatalog for BookRepository {
    async fn find_book(&self, book_id: i64) -> StoreResult<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(
            "SELECT id, title, price, quantity FROM books WHERE id = $1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Book::from))
    }
}

#[async_trait]
impl InventoryLedger for BookRepository {
    async fn reserve_stock(&self, book_id: i64, quantity: i32) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        conditional_decrement(&mut conn, book_id, quantity).await
    }

    async fn restore_stock(&self, book_id: i64, quantity: i32) -> StoreResult<()> {
        sqlx::query("UPDATE books SET quantity = quantity + $2 WHERE id = $1")
            .bind(book_id)
            .bind(quantity)
            .execute(&self.pool)
            .await?;
        debug!(book_id, quantity, "stock restored");
        Ok(())
    }

    /// One transaction around the whole loop; dropping it on failure rolls every line back.
    /// Rows are locked in book id order so overlapping checkouts cannot deadlock.
    async fn reserve_all(&self, items: &[StockReservation]) -> StoreResult<ReservationOutcome> {
        let items = StockReservation::consolidate(items);
        let mut tx = self.pool.begin().await?;
        for item in &items {
            if !conditional_decrement(&mut tx, item.book_id, item.quantity).await? {
                tx.rollback().await?;
                warn!(
                    book_id = item.book_id,
                    quantity = item.quantity,
                    "stock reservation rejected; transaction rolled back"
                );
                return Ok(ReservationOutcome::Insufficient {
                    book_id: item.book_id,
                });
            }
        }
        tx.commit().await?;
        Ok(ReservationOutcome::Reserved)
    }
}
