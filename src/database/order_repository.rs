use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use tracing::debug;

use crate::database::error::{StoreError, StoreResult};
use crate::database::repository::{OrderStore, StockReservation};
use crate::orders::{NewOrder, Order, OrderLineItem, OrderStatus, Receiver};

const ORDER_COLUMNS: &str = "order_code, user_id, buyer_email, receiver_name, receiver_phone, \
     receiver_address, note, status, payment_method, payment_status, total_price, created_at, \
     expires_at, transaction_ref";

/// Order row as stored; statuses are kept as text and parsed on the way out.
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    order_code: String,
    user_id: i64,
    buyer_email: String,
    receiver_name: String,
    receiver_phone: String,
    receiver_address: String,
    note: Option<String>,
    status: String,
    payment_method: String,
    payment_status: String,
    total_price: sqlx::types::BigDecimal,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    transaction_ref: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct OrderItemRow {
    order_code: String,
    book_id: i64,
    title: String,
    quantity: i32,
    unit_price: sqlx::types::BigDecimal,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderLineItem>) -> StoreResult<Order> {
        let integrity = |e: crate::orders::OrderError| {
            StoreError::Integrity(format!("order {}: {}", self.order_code, e))
        };
        Ok(Order {
            status: self.status.parse().map_err(integrity)?,
            payment_method: self.payment_method.parse().map_err(integrity)?,
            payment_status: self.payment_status.parse().map_err(integrity)?,
            order_code: self.order_code,
            user_id: self.user_id,
            buyer_email: self.buyer_email,
            receiver: Receiver {
                name: self.receiver_name,
                phone: self.receiver_phone,
                address: self.receiver_address,
            },
            note: self.note,
            total_price: self.total_price,
            items,
            created_at: self.created_at,
            expires_at: self.expires_at,
            transaction_ref: self.transaction_ref,
        })
    }
}

impl From<OrderItemRow> for OrderLineItem {
    fn from(row: OrderItemRow) -> Self {
        OrderLineItem {
            book_id: row.book_id,
            title: row.title,
            quantity: row.quantity,
            unit_price: row.unit_price,
        }
    }
}

/// Repository for orders and their line items
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_items(
        conn: &mut PgConnection,
        rows: Vec<OrderRow>,
    ) -> StoreResult<Vec<Order>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let codes: Vec<String> = rows.iter().map(|row| row.order_code.clone()).collect();
        let item_rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT order_code, book_id, title, quantity, unit_price
             FROM order_items
             WHERE order_code = ANY($1)
             ORDER BY id ASC",
        )
        .bind(&codes)
        .fetch_all(&mut *conn)
        .await?;

        let mut items: HashMap<String, Vec<OrderLineItem>> = HashMap::new();
        for row in item_rows {
            items
                .entry(row.order_code.clone())
                .or_default()
                .push(OrderLineItem::from(row));
        }

        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.order_code).unwrap_or_default();
                row.into_order(lines)
            })
            .collect()
    }

    /// Runs a conditional `UPDATE ... RETURNING` and loads the items of the affected order.
    async fn update_returning(
        &self,
        sql: &str,
        order_code: &str,
        extra: Option<&str>,
    ) -> StoreResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let mut query = sqlx::query_as::<_, OrderRow>(sql).bind(order_code);
        if let Some(value) = extra {
            query = query.bind(value);
        }
        let row = query.fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => Ok(Self::attach_items(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn insert_order(&self, order: NewOrder) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders
             (order_code, user_id, buyer_email, receiver_name, receiver_phone, receiver_address,
              note, status, payment_method, payment_status, total_price, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8, 'UNPAID', $9, $10, $11)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&order.order_code)
        .bind(order.user_id)
        .bind(&order.buyer_email)
        .bind(&order.receiver.name)
        .bind(&order.receiver.phone)
        .bind(&order.receiver.address)
        .bind(&order.note)
        .bind(order.payment_method.as_str())
        .bind(&order.total_price)
        .bind(order.created_at)
        .bind(order.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items (order_code, book_id, title, quantity, unit_price)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&order.order_code)
            .bind(item.book_id)
            .bind(&item.title)
            .bind(item.quantity)
            .bind(&item.unit_price)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(order_code = %order.order_code, lines = order.items.len(), "order persisted");
        row.into_order(order.items)
    }

    async fn find_by_code(&self, order_code: &str) -> StoreResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_code = $1"
        ))
        .bind(order_code)
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => Ok(Self::attach_items(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_buyer_email(&self, email: &str) -> StoreResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE lower(buyer_email) = lower($1)
             ORDER BY created_at DESC, order_code DESC"
        ))
        .bind(email.trim())
        .fetch_all(&mut *conn)
        .await?;
        Self::attach_items(&mut conn, rows).await
    }

    async fn find_expired_gateway_orders(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE payment_method = 'VNPAY'
               AND payment_status = 'UNPAID'
               AND status = 'PENDING'
               AND expires_at < $1
             ORDER BY expires_at ASC
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Self::attach_items(&mut conn, rows).await
    }

    async fn mark_paid(
        &self,
        order_code: &str,
        transaction_ref: &str,
    ) -> StoreResult<Option<Order>> {
        self.update_returning(
            &format!(
                "UPDATE orders
                 SET payment_status = 'PAID', expires_at = NULL, transaction_ref = $2
                 WHERE order_code = $1 AND status = 'PENDING' AND payment_status = 'UNPAID'
                 RETURNING {ORDER_COLUMNS}"
            ),
            order_code,
            Some(transaction_ref),
        )
        .await
    }

    /// The conditional cancel and every restock share one transaction; any error drops it
    /// uncommitted, so the order stays cancellable and the next attempt starts clean.
    async fn cancel_and_restock(&self, order_code: &str) -> StoreResult<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET status = 'CANCELLED', expires_at = NULL
             WHERE order_code = $1
               AND status IN ('PENDING', 'PROCESSING')
               AND payment_status = 'UNPAID'
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_code)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let order = Self::attach_items(&mut tx, vec![row])
            .await?
            .pop()
            .ok_or_else(|| StoreError::Integrity(format!("order {} vanished", order_code)))?;

        for line in StockReservation::consolidate(&StockReservation::for_order(&order)) {
            let result = sqlx::query("UPDATE books SET quantity = quantity + $2 WHERE id = $1")
                .bind(line.book_id)
                .bind(line.quantity)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() != 1 {
                return Err(StoreError::Integrity(format!(
                    "order {} references missing book {}",
                    order_code, line.book_id
                )));
            }
        }
        tx.commit().await?;
        debug!(order_code, lines = order.items.len(), "order cancelled and restocked");
        Ok(Some(order))
    }

    async fn transition_status(
        &self,
        order_code: &str,
        from: OrderStatus,
        to: OrderStatus,
        settle_payment: bool,
    ) -> StoreResult<Option<Order>> {
        let settle = if settle_payment {
            ", payment_status = 'PAID', expires_at = NULL"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE orders
             SET status = '{}'{}
             WHERE order_code = $1 AND status = '{}'
             RETURNING {ORDER_COLUMNS}",
            to.as_str(),
            settle,
            from.as_str()
        );
        self.update_returning(&sql, order_code, None).await
    }
}
