//! Store interfaces consumed by the order service.
//!
//! Every implementation must keep the same guarantees: stock is taken only through the
//! conditional [`InventoryLedger`] writes, a cancellation and its restock commit together
//! through [`OrderStore::cancel_and_restock`], and order transitions that release or capture
//! stock are conditional on the current state so that concurrent callers cannot both win.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, warn};

use crate::database::error::StoreResult;
use crate::orders::{NewOrder, Order, OrderStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub price: BigDecimal,
    pub quantity: i32,
}

/// One line of stock to take out of (or put back into) the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockReservation {
    pub book_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved,
    /// Nothing is left reserved when this is returned.
    Insufficient { book_id: i64 },
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
}

#[async_trait]
pub trait BookCatalog: Send + Sync {
    async fn find_book(&self, book_id: i64) -> StoreResult<Option<Book>>;
}

#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Conditional decrement. Returns `true` iff the full quantity was available and taken.
    async fn reserve_stock(&self, book_id: i64, quantity: i32) -> StoreResult<bool>;

    /// Unconditional increment.
    async fn restore_stock(&self, book_id: i64, quantity: i32) -> StoreResult<()>;

    /// All-or-nothing reservation of several lines.
    ///
    /// The default implementation reserves line by line and puts back every line already
    /// taken as soon as one fails. Stores that can share a transaction across the loop
    /// should override it.
    async fn reserve_all(&self, items: &[StockReservation]) -> StoreResult<ReservationOutcome> {
        let mut reserved: Vec<StockReservation> = Vec::with_capacity(items.len());
        for item in items {
            let result = self.reserve_stock(item.book_id, item.quantity).await;
            match result {
                Ok(true) => reserved.push(*item),
                Ok(false) => {
                    self.release_all(&reserved).await;
                    return Ok(ReservationOutcome::Insufficient {
                        book_id: item.book_id,
                    });
                }
                Err(e) => {
                    self.release_all(&reserved).await;
                    return Err(e);
                }
            }
        }
        Ok(ReservationOutcome::Reserved)
    }

    /// Best-effort restock of lines that were reserved earlier. Failures are logged, not
    /// returned, so one bad line cannot stop the others from being restored.
    async fn release_all(&self, items: &[StockReservation]) {
        for item in items {
            if let Err(e) = self.restore_stock(item.book_id, item.quantity).await {
                error!(
                    book_id = item.book_id,
                    quantity = item.quantity,
                    error = %e,
                    "failed to restore reserved stock; manual reconciliation required"
                );
            }
        }
        if !items.is_empty() {
            warn!(lines = items.len(), "rolled back provisional stock reservations");
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: NewOrder) -> StoreResult<Order>;

    async fn find_by_code(&self, order_code: &str) -> StoreResult<Option<Order>>;

    /// Most recent first.
    async fn find_by_buyer_email(&self, email: &str) -> StoreResult<Vec<Order>>;

    /// Unpaid gateway orders still pending whose `expires_at` is before `now`.
    async fn find_expired_gateway_orders(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>>;

    /// PENDING/UNPAID → PAID, clearing the expiry and recording the transaction reference.
    /// Returns `None` when the order was no longer PENDING/UNPAID.
    async fn mark_paid(&self, order_code: &str, transaction_ref: &str)
        -> StoreResult<Option<Order>>;

    /// PENDING|PROCESSING while UNPAID → CANCELLED, clearing the expiry and putting every
    /// line's quantity back on the shelf in the same atomic step. On error neither the
    /// transition nor any part of the restock is applied.
    /// Returns `None` when the order was no longer cancellable.
    async fn cancel_and_restock(&self, order_code: &str) -> StoreResult<Option<Order>>;

    /// `from` → `to`, optionally settling payment in the same write.
    /// Returns `None` when the order was no longer in `from`.
    async fn transition_status(
        &self,
        order_code: &str,
        from: OrderStatus,
        to: OrderStatus,
        settle_payment: bool,
    ) -> StoreResult<Option<Order>>;
}

impl StockReservation {
    pub fn for_order(order: &Order) -> Vec<StockReservation> {
        order
            .items
            .iter()
            .map(|item| StockReservation {
                book_id: item.book_id,
                quantity: item.quantity,
            })
            .collect()
    }

    /// One line per book, sorted by book id. Writers that lock several book rows in one
    /// transaction take the locks in this order so two of them cannot deadlock.
    pub fn consolidate(items: &[StockReservation]) -> Vec<StockReservation> {
        let mut merged: BTreeMap<i64, i32> = BTreeMap::new();
        for item in items {
            let quantity = merged.entry(item.book_id).or_insert(0);
            *quantity = quantity.saturating_add(item.quantity);
        }
        merged
            .into_iter()
            .map(|(book_id, quantity)| StockReservation { book_id, quantity })
            .collect()
    }
}
