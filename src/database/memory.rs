//! In-process store used when `SKIP_EXTERNALS=true` and by the test-suite.
//!
//! Each trait method takes the lock once, so the conditional checks and the writes that
//! depend on them happen as one step, matching the single-statement semantics of the
//! Postgres repositories.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::database::error::{StoreError, StoreResult};
use crate::database::repository::{
    Book, BookCatalog, InventoryLedger, OrderStore, StockReservation, User, UserDirectory,
};
use crate::orders::{NewOrder, Order, OrderStatus, PaymentStatus};

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    books: HashMap<i64, Book>,
    orders: HashMap<String, Order>,
    next_user_id: i64,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, email: &str, full_name: &str) -> User {
        let mut state = self.state.lock().await;
        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            email: email.to_string(),
            full_name: full_name.to_string(),
        };
        state.users.insert(email.to_lowercase(), user.clone());
        user
    }

    pub async fn add_book(&self, id: i64, title: &str, price: BigDecimal, quantity: i32) -> Book {
        let book = Book {
            id,
            title: title.to_string(),
            price,
            quantity,
        };
        self.state.lock().await.books.insert(id, book.clone());
        book
    }

    pub async fn stock_of(&self, book_id: i64) -> Option<i32> {
        self.state
            .lock()
            .await
            .books
            .get(&book_id)
            .map(|book| book.quantity)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .get(&email.trim().to_lowercase())
            .cloned())
    }
}

#[async_trait]
impl BookCatalog for InMemoryStore {
    async fn find_book(&self, book_id: i64) -> StoreResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(&book_id).cloned())
    }
}

#[async_trait]
impl InventoryLedger for InMemoryStore {
    async fn reserve_stock(&self, book_id: i64, quantity: i32) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.books.get_mut(&book_id) {
            Some(book) if quantity > 0 && book.quantity >= quantity => {
                book.quantity -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_stock(&self, book_id: i64, quantity: i32) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let book = state
            .books
            .get_mut(&book_id)
            .ok_or_else(|| StoreError::Integrity(format!("book {} does not exist", book_id)))?;
        book.quantity += quantity;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: NewOrder) -> StoreResult<Order> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.order_code) {
            return Err(StoreError::Integrity(format!(
                "duplicate order code {}",
                order.order_code
            )));
        }
        let order = order.into_order();
        state.orders.insert(order.order_code.clone(), order.clone());
        Ok(order)
    }

    async fn find_by_code(&self, order_code: &str) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(order_code).cloned())
    }

    async fn find_by_buyer_email(&self, email: &str) -> StoreResult<Vec<Order>> {
        let email = email.trim().to_lowercase();
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.buyer_email.to_lowercase() == email)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_code.cmp(&a.order_code))
        });
        Ok(orders)
    }

    async fn find_expired_gateway_orders(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut expired: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.is_awaiting_gateway_payment() && order.is_expired_at(now))
            .cloned()
            .collect();
        expired.sort_by_key(|order| order.expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn mark_paid(
        &self,
        order_code: &str,
        transaction_ref: &str,
    ) -> StoreResult<Option<Order>> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(order_code) {
            Some(order)
                if order.status == OrderStatus::Pending
                    && order.payment_status == PaymentStatus::Unpaid =>
            {
                order.payment_status = PaymentStatus::Paid;
                order.expires_at = None;
                order.transaction_ref = Some(transaction_ref.to_string());
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cancel_and_restock(&self, order_code: &str) -> StoreResult<Option<Order>> {
        let mut state = self.state.lock().await;
        let lines = match state.orders.get(order_code) {
            Some(order) if order.is_cancellable() => StockReservation::for_order(order),
            _ => return Ok(None),
        };
        // Validate every line before writing anything.
        if let Some(missing) = lines.iter().find(|line| !state.books.contains_key(&line.book_id)) {
            return Err(StoreError::Integrity(format!(
                "order {} references missing book {}",
                order_code, missing.book_id
            )));
        }
        for line in &lines {
            if let Some(book) = state.books.get_mut(&line.book_id) {
                book.quantity += line.quantity;
            }
        }
        match state.orders.get_mut(order_code) {
            Some(order) => {
                order.status = OrderStatus::Cancelled;
                order.expires_at = None;
                Ok(Some(order.clone()))
            }
            None => Ok(None),
        }
    }

    async fn transition_status(
        &self,
        order_code: &str,
        from: OrderStatus,
        to: OrderStatus,
        settle_payment: bool,
    ) -> StoreResult<Option<Order>> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(order_code) {
            Some(order) if order.status == from => {
                order.status = to;
                if settle_payment {
                    order.payment_status = PaymentStatus::Paid;
                    order.expires_at = None;
                }
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }
}
