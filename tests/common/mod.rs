//! Shared fixtures for the order service integration tests: an in-memory store, a manual
//! clock, a sandbox-configured gateway and a notifier that records what it was asked to send.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use bookstore_orders::database::error::{StoreError, StoreResult};
use bookstore_orders::database::memory::InMemoryStore;
use bookstore_orders::database::repository::OrderStore;
use bookstore_orders::orders::{
    CreateOrderRequest, NewOrder, Order, OrderItemRequest, OrderStatus, PaymentMethod,
};
use bookstore_orders::payments::{VnpayConfig, VnpayGateway};
use bookstore_orders::services::clock::ManualClock;
use bookstore_orders::services::notification::{
    NotificationError, NotificationSender, NotificationTemplate, OrderNotification,
};
use bookstore_orders::services::order_service::{OrderService, OrderServiceConfig, OrderStores};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BUYER: &str = "reader@example.com";
pub const HASH_SECRET: &str = "TESTSECRETKEY";
pub const CLIENT_IP: &str = "203.0.113.7";

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OrderNotification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(NotificationTemplate, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| (n.template, n.order.order_code.clone()))
            .collect()
    }

    /// Notifications are dispatched on spawned tasks; give them a moment to land.
    pub async fn wait_for(&self, count: usize) -> Vec<(NotificationTemplate, String)> {
        for _ in 0..100 {
            if self.sent.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, notification: OrderNotification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Order store over the in-memory store whose cancellations fail for selected orders, the
/// way a dropped connection would in the middle of the restock.
pub struct FlakyOrders {
    inner: Arc<InMemoryStore>,
    failing: Mutex<HashSet<String>>,
}

impl FlakyOrders {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_cancel(&self, order_code: &str) {
        self.failing.lock().unwrap().insert(order_code.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl OrderStore for FlakyOrders {
    async fn insert_order(&self, order: NewOrder) -> StoreResult<Order> {
        self.inner.insert_order(order).await
    }

    async fn find_by_code(&self, order_code: &str) -> StoreResult<Option<Order>> {
        self.inner.find_by_code(order_code).await
    }

    async fn find_by_buyer_email(&self, email: &str) -> StoreResult<Vec<Order>> {
        self.inner.find_by_buyer_email(email).await
    }

    async fn find_expired_gateway_orders(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        self.inner.find_expired_gateway_orders(now, limit).await
    }

    async fn mark_paid(
        &self,
        order_code: &str,
        transaction_ref: &str,
    ) -> StoreResult<Option<Order>> {
        self.inner.mark_paid(order_code, transaction_ref).await
    }

    async fn cancel_and_restock(&self, order_code: &str) -> StoreResult<Option<Order>> {
        if self.failing.lock().unwrap().contains(order_code) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.cancel_and_restock(order_code).await
    }

    async fn transition_status(
        &self,
        order_code: &str,
        from: OrderStatus,
        to: OrderStatus,
        settle_payment: bool,
    ) -> StoreResult<Option<Order>> {
        self.inner
            .transition_status(order_code, from, to, settle_payment)
            .await
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<VnpayGateway>,
    pub service: Arc<OrderService>,
}

pub fn gateway() -> VnpayGateway {
    VnpayGateway::new(VnpayConfig {
        tmn_code: "TESTTMN1".to_string(),
        hash_secret: HASH_SECRET.to_string(),
        ..VnpayConfig::default()
    })
    .unwrap()
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::build(store.clone(), store).await
    }

    /// Same wiring, but order writes go through a [`FlakyOrders`] that tests can break.
    pub async fn with_flaky_orders() -> (Self, Arc<FlakyOrders>) {
        let store = Arc::new(InMemoryStore::new());
        let orders = Arc::new(FlakyOrders::new(store.clone()));
        (Self::build(store, orders.clone()).await, orders)
    }

    async fn build(store: Arc<InMemoryStore>, orders: Arc<dyn OrderStore>) -> Self {
        store.add_user(BUYER, "Avid Reader").await;

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap(),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = Arc::new(gateway());

        let stores = OrderStores {
            orders,
            ..OrderStores::shared(store.clone())
        };
        let service = Arc::new(OrderService::new(
            stores,
            gateway.clone(),
            notifier.clone(),
            clock.clone(),
            OrderServiceConfig::default(),
        ));

        Self {
            store,
            clock,
            notifier,
            gateway,
            service,
        }
    }

    /// A callback for `order_code` signed with the sandbox secret.
    pub fn signed_callback(
        &self,
        order_code: &str,
        response_code: &str,
        amount_minor: i64,
    ) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("vnp_TmnCode".to_string(), "TESTTMN1".to_string());
        params.insert("vnp_Amount".to_string(), amount_minor.to_string());
        params.insert("vnp_BankCode".to_string(), "NCB".to_string());
        params.insert(
            "vnp_OrderInfo".to_string(),
            format!("Thanh toan don hang {}", order_code),
        );
        params.insert("vnp_ResponseCode".to_string(), response_code.to_string());
        params.insert("vnp_TransactionNo".to_string(), "14226112".to_string());
        params.insert(
            "vnp_TxnRef".to_string(),
            format!("{}_{}", order_code, self.clock_millis()),
        );
        let hash = self.gateway.sign(&params).unwrap();
        params.insert("vnp_SecureHash".to_string(), hash);
        params
    }

    fn clock_millis(&self) -> i64 {
        use bookstore_orders::services::clock::Clock;
        self.clock.now().timestamp_millis()
    }
}

pub fn money(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn line(book_id: i64, quantity: i32, unit_price: &str) -> OrderItemRequest {
    OrderItemRequest {
        book_id,
        quantity,
        unit_price: money(unit_price),
    }
}

pub fn request(
    payment_method: PaymentMethod,
    items: Vec<OrderItemRequest>,
    total: &str,
) -> CreateOrderRequest {
    CreateOrderRequest {
        receiver_name: "Nguyen Van A".to_string(),
        receiver_phone: "0901234567".to_string(),
        receiver_address: "12 Hang Bai, Ha Noi".to_string(),
        note: None,
        payment_method,
        items,
        total_price: money(total),
    }
}
