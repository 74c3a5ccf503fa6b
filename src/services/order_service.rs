//! Order Service
//!
//! Owns the order lifecycle: checkout with atomic stock reservation, gateway redirects,
//! reconciliation of signed payment callbacks, cancellation with restock and fulfilment
//! transitions. Every state change that captures or releases stock goes through a
//! conditional store update, so a callback and a cancellation racing on the same order
//! cannot both win.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::error::StoreError;
use crate::database::repository::{
    BookCatalog, InventoryLedger, OrderStore, ReservationOutcome, StockReservation,
    UserDirectory,
};
use crate::orders::types::sum_line_items;
use crate::orders::{
    generate_order_code, CreateOrderRequest, NewOrder, Order, OrderError, OrderLineItem,
    OrderResult, OrderStatus, PaymentMethod, PaymentStatus,
};
use crate::payments::types::to_minor_units;
use crate::payments::PaymentGateway;
use crate::services::clock::Clock;
use crate::services::notification::{dispatch, NotificationSender, NotificationTemplate};

const FALLBACK_CLIENT_IP: &str = "127.0.0.1";
const REDIRECT_CODE: &str = "00";

// ============================================================================
// Configuration & Collaborators
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderServiceConfig {
    /// How long a gateway order holds its stock while waiting for payment.
    pub payment_window: Duration,
}

impl Default for OrderServiceConfig {
    fn default() -> Self {
        Self {
            payment_window: Duration::minutes(2),
        }
    }
}

/// The stores the service reads and writes.
#[derive(Clone)]
pub struct OrderStores {
    pub users: Arc<dyn UserDirectory>,
    pub books: Arc<dyn BookCatalog>,
    pub inventory: Arc<dyn InventoryLedger>,
    pub orders: Arc<dyn OrderStore>,
}

impl OrderStores {
    /// All four roles served by one store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: UserDirectory + BookCatalog + InventoryLedger + OrderStore + 'static,
    {
        Self {
            users: store.clone(),
            books: store.clone(),
            inventory: store.clone(),
            orders: store,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Where the buyer is sent to pay for a gateway order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRedirect {
    pub code: String,
    pub message: String,
    pub order_code: String,
    pub payment_url: String,
}

#[derive(Debug, Clone)]
pub enum CreateOrderOutcome {
    /// Cash on delivery: nothing left to pay online.
    Confirmed(Order),
    PaymentRedirect(PaymentRedirect),
}

impl CreateOrderOutcome {
    pub fn order_code(&self) -> &str {
        match self {
            CreateOrderOutcome::Confirmed(order) => &order.order_code,
            CreateOrderOutcome::PaymentRedirect(redirect) => &redirect.order_code,
        }
    }
}

/// Result of reconciling one gateway callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    /// The order had already been paid by an earlier callback; nothing changed.
    pub already_confirmed: bool,
    pub order_code: String,
    pub response_code: String,
    pub transaction_no: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(Order),
    /// Already cancelled or already paid; stock untouched.
    NoOp(Order),
}

impl CancelOutcome {
    pub fn order(&self) -> &Order {
        match self {
            CancelOutcome::Cancelled(order) | CancelOutcome::NoOp(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            CancelOutcome::Cancelled(order) | CancelOutcome::NoOp(order) => order,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self, CancelOutcome::Cancelled(_))
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct OrderService {
    stores: OrderStores,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    config: OrderServiceConfig,
}

impl OrderService {
    pub fn new(
        stores: OrderStores,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        config: OrderServiceConfig,
    ) -> Self {
        Self {
            stores,
            gateway,
            notifier,
            clock,
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Checkout. Stock for every line is reserved before the order exists; if anything after
    /// the reservation fails, the reservation is handed back.
    pub async fn create_order(
        &self,
        buyer_email: &str,
        request: CreateOrderRequest,
        client_ip: &str,
    ) -> OrderResult<CreateOrderOutcome> {
        let buyer_email = buyer_email.trim();
        let user = self
            .stores
            .users
            .find_user_by_email(buyer_email)
            .await?
            .ok_or_else(|| OrderError::UserNotFound {
                email: buyer_email.to_string(),
            })?;

        request.validate()?;

        let items = self.price_line_items(&request).await?;
        let computed = sum_line_items(&items);
        if request.total_price != computed {
            warn!(
                buyer = %user.email,
                submitted = %request.total_price,
                computed = %computed,
                "order total rejected"
            );
            return Err(OrderError::TotalMismatch {
                submitted: request.total_price.to_string(),
                computed: computed.to_string(),
            });
        }

        let reservations: Vec<StockReservation> = items
            .iter()
            .map(|item| StockReservation {
                book_id: item.book_id,
                quantity: item.quantity,
            })
            .collect();

        if let ReservationOutcome::Insufficient { book_id } =
            self.stores.inventory.reserve_all(&reservations).await?
        {
            let title = items
                .iter()
                .find(|item| item.book_id == book_id)
                .map(|item| item.title.clone())
                .unwrap_or_default();
            info!(buyer = %user.email, book_id, "checkout rejected: insufficient stock");
            return Err(OrderError::InsufficientStock { book_id, title });
        }

        let now = self.clock.now();
        let payment_method = request.payment_method;
        let new_order = NewOrder {
            order_code: generate_order_code(now),
            user_id: user.id,
            buyer_email: user.email.clone(),
            receiver: request.receiver(),
            note: request
                .note
                .as_deref()
                .map(str::trim)
                .filter(|note| !note.is_empty())
                .map(str::to_string),
            payment_method,
            total_price: computed,
            items,
            created_at: now,
            expires_at: payment_method
                .is_gateway()
                .then(|| now + self.config.payment_window),
        };

        let order = match self.stores.orders.insert_order(new_order).await {
            Ok(order) => order,
            Err(e) => {
                error!(buyer = %user.email, error = %e, "failed to persist order; releasing stock");
                self.stores.inventory.release_all(&reservations).await;
                return Err(e.into());
            }
        };

        info!(
            order_code = %order.order_code,
            buyer = %order.buyer_email,
            payment_method = %order.payment_method,
            total = %order.total_price,
            lines = order.items.len(),
            "order created"
        );

        match order.payment_method {
            PaymentMethod::Cod => {
                dispatch(
                    self.notifier.clone(),
                    NotificationTemplate::OrderConfirmation,
                    &order,
                );
                Ok(CreateOrderOutcome::Confirmed(order))
            }
            PaymentMethod::Vnpay => match self.redirect_for(&order, client_ip, now) {
                Ok(redirect) => Ok(CreateOrderOutcome::PaymentRedirect(redirect)),
                Err(e) => {
                    error!(
                        order_code = %order.order_code,
                        error = %e,
                        "could not build payment redirect; cancelling order"
                    );
                    self.cancel_order(&order.order_code).await?;
                    Err(e)
                }
            },
        }
    }

    /// A fresh redirect for a gateway order that is still inside its payment window. Stock
    /// stays reserved from the original checkout.
    pub async fn retry_payment(
        &self,
        order_code: &str,
        client_ip: &str,
    ) -> OrderResult<PaymentRedirect> {
        let order = self.get_order(order_code).await?;
        if !order.is_awaiting_gateway_payment() {
            return Err(OrderError::invalid_state(
                &order.order_code,
                order.status,
                order.payment_status,
                "retry payment for",
            ));
        }

        let now = self.clock.now();
        if order.is_expired_at(now) {
            info!(order_code = %order.order_code, "payment retry after window closed");
            return Err(OrderError::PaymentExpired {
                order_code: order.order_code,
            });
        }

        let redirect = self.redirect_for(&order, client_ip, now)?;
        info!(order_code = %order.order_code, "payment retry issued");
        Ok(redirect)
    }

    /// Reconcile a gateway callback against the order. Unsigned or tampered callbacks never
    /// reach the store.
    pub async fn confirm_order(
        &self,
        params: &BTreeMap<String, String>,
    ) -> OrderResult<PaymentResult> {
        if !self.gateway.verify_callback(params) {
            return Err(OrderError::SignatureInvalid);
        }
        let callback = self.gateway.parse_callback(params)?;
        let order = self.get_order(&callback.order_code).await?;

        let result = |success: bool, already_confirmed: bool, message: &str| PaymentResult {
            success,
            already_confirmed,
            order_code: callback.order_code.clone(),
            response_code: callback.response_code.clone(),
            transaction_no: callback.transaction_no.clone(),
            message: message.to_string(),
        };

        if order.payment_method != PaymentMethod::Vnpay || order.status == OrderStatus::Cancelled
        {
            warn!(
                order_code = %order.order_code,
                status = %order.status,
                response_code = %callback.response_code,
                "payment callback for an order that cannot take payment"
            );
            return Err(OrderError::invalid_state(
                &order.order_code,
                order.status,
                order.payment_status,
                "confirm payment for",
            ));
        }

        if order.payment_status == PaymentStatus::Paid {
            info!(order_code = %order.order_code, "duplicate payment callback ignored");
            return Ok(result(true, true, "Order already confirmed"));
        }

        if !callback.is_success() {
            info!(
                order_code = %order.order_code,
                response_code = %callback.response_code,
                "payment not completed at gateway"
            );
            return Ok(result(false, false, "Payment was not completed"));
        }

        let expected = to_minor_units(&order.total_price)?;
        if callback.amount_minor != expected {
            warn!(
                order_code = %order.order_code,
                expected,
                paid = callback.amount_minor,
                "payment amount does not match order"
            );
            return Err(OrderError::AmountMismatch {
                order_code: order.order_code,
                expected,
                paid: callback.amount_minor,
            });
        }

        match self
            .stores
            .orders
            .mark_paid(&order.order_code, &callback.transaction_ref)
            .await?
        {
            Some(paid) => {
                info!(
                    order_code = %paid.order_code,
                    transaction_ref = %callback.transaction_ref,
                    "order paid"
                );
                dispatch(
                    self.notifier.clone(),
                    NotificationTemplate::PaymentConfirmation,
                    &paid,
                );
                Ok(result(true, false, "Payment confirmed"))
            }
            None => {
                // Lost a race with another callback or with the sweeper.
                let current = self.get_order(&order.order_code).await?;
                if current.payment_status == PaymentStatus::Paid {
                    Ok(result(true, true, "Order already confirmed"))
                } else {
                    warn!(
                        order_code = %current.order_code,
                        status = %current.status,
                        "payment callback lost race with cancellation"
                    );
                    Err(OrderError::invalid_state(
                        &current.order_code,
                        current.status,
                        current.payment_status,
                        "confirm payment for",
                    ))
                }
            }
        }
    }

    /// Cancel an unpaid order and put its stock back. Safe to call repeatedly: only the call
    /// that performs the transition restocks. A store error leaves the order cancellable and
    /// its stock reserved for a later call or the next sweep to retry.
    pub async fn cancel_order(&self, order_code: &str) -> OrderResult<CancelOutcome> {
        let order = self.get_order(order_code).await?;
        if let Some(outcome) = Self::precheck_cancel(order)? {
            return Ok(outcome);
        }

        let cancelled = self
            .stores
            .orders
            .cancel_and_restock(order_code)
            .await
            .map_err(|e| {
                error!(order_code, error = %e, "cancellation rolled back");
                e
            })?;
        match cancelled {
            Some(cancelled) => {
                info!(
                    order_code = %cancelled.order_code,
                    lines = cancelled.items.len(),
                    "order cancelled and stock restored"
                );
                Ok(CancelOutcome::Cancelled(cancelled))
            }
            None => {
                let current = self.get_order(order_code).await?;
                match Self::precheck_cancel(current)? {
                    Some(outcome) => Ok(outcome),
                    None => Err(OrderError::Store(StoreError::Integrity(format!(
                        "order {} is cancellable but the conditional update matched nothing",
                        order_code
                    )))),
                }
            }
        }
    }

    /// `Some` when the order needs no cancellation, `Err` when it must not be cancelled.
    fn precheck_cancel(order: Order) -> OrderResult<Option<CancelOutcome>> {
        if order.status == OrderStatus::Cancelled {
            return Ok(Some(CancelOutcome::NoOp(order)));
        }
        if matches!(order.status, OrderStatus::Shipping | OrderStatus::Delivered) {
            return Err(OrderError::invalid_state(
                &order.order_code,
                order.status,
                order.payment_status,
                "cancel",
            ));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Ok(Some(CancelOutcome::NoOp(order)));
        }
        Ok(None)
    }

    /// Fulfilment step: PENDING → PROCESSING → SHIPPING → DELIVERED. Gateway orders must be
    /// paid before they leave PENDING; cash-on-delivery orders are settled on delivery.
    pub async fn advance_status(&self, order_code: &str, next: OrderStatus) -> OrderResult<Order> {
        if next == OrderStatus::Cancelled {
            return self
                .cancel_order(order_code)
                .await
                .map(CancelOutcome::into_order);
        }

        let order = self.get_order(order_code).await?;
        let unpaid_gateway =
            order.payment_method.is_gateway() && order.payment_status == PaymentStatus::Unpaid;
        if !order.status.can_transition_to(next) || unpaid_gateway {
            return Err(OrderError::invalid_state(
                &order.order_code,
                order.status,
                order.payment_status,
                "advance",
            ));
        }

        let settle =
            order.payment_method == PaymentMethod::Cod && next == OrderStatus::Delivered;
        match self
            .stores
            .orders
            .transition_status(order_code, order.status, next, settle)
            .await?
        {
            Some(updated) => {
                info!(
                    order_code = %updated.order_code,
                    from = %order.status,
                    to = %updated.status,
                    payment_status = %updated.payment_status,
                    "order status advanced"
                );
                Ok(updated)
            }
            None => {
                let current = self.get_order(order_code).await?;
                Err(OrderError::invalid_state(
                    &current.order_code,
                    current.status,
                    current.payment_status,
                    "advance",
                ))
            }
        }
    }

    pub async fn get_order(&self, order_code: &str) -> OrderResult<Order> {
        self.stores
            .orders
            .find_by_code(order_code)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound {
                order_code: order_code.to_string(),
            })
    }

    /// Most recent first.
    pub async fn get_orders_by_email(&self, email: &str) -> OrderResult<Vec<Order>> {
        Ok(self.stores.orders.find_by_buyer_email(email).await?)
    }

    /// Gateway orders whose payment window closed before now.
    pub async fn find_expired_orders(&self, limit: i64) -> OrderResult<Vec<Order>> {
        let now = self.clock.now();
        Ok(self
            .stores
            .orders
            .find_expired_gateway_orders(now, limit)
            .await?)
    }

    async fn price_line_items(&self, request: &CreateOrderRequest) -> OrderResult<Vec<OrderLineItem>> {
        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let book = self
                .stores
                .books
                .find_book(line.book_id)
                .await?
                .ok_or(OrderError::BookNotFound {
                    book_id: line.book_id,
                })?;
            if line.unit_price != book.price {
                // Client prices are advisory; the catalog price is what gets charged.
                warn!(
                    book_id = book.id,
                    submitted = %line.unit_price,
                    catalog = %book.price,
                    "client unit price differs from catalog"
                );
            }
            items.push(OrderLineItem {
                book_id: book.id,
                title: book.title,
                quantity: line.quantity,
                unit_price: book.price,
            });
        }
        Ok(items)
    }

    fn redirect_for(
        &self,
        order: &Order,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> OrderResult<PaymentRedirect> {
        let client_ip = if client_ip.trim().is_empty() {
            FALLBACK_CLIENT_IP
        } else {
            client_ip.trim()
        };
        let session = self.gateway.build_payment_url(order, client_ip, now)?;
        Ok(PaymentRedirect {
            code: REDIRECT_CODE.to_string(),
            message: "success".to_string(),
            order_code: session.order_code,
            payment_url: session.payment_url,
        })
    }
}
