use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::orders::error::OrderError;

pub const ORDER_CODE_PREFIX: &str = "ORD";
const ORDER_CODE_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipping,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipping => "SHIPPING",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Get all valid transitions from this status
    pub fn valid_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[OrderStatus::Shipping, OrderStatus::Cancelled],
            OrderStatus::Shipping => &[OrderStatus::Delivered],
            // Terminal states - no valid transitions
            OrderStatus::Delivered => &[],
            OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPING" => Ok(OrderStatus::Shipping),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            _ => Err(OrderError::InvalidRequest(format!(
                "unknown order status: {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Paid => "PAID",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "UNPAID" => Ok(PaymentStatus::Unpaid),
            "PAID" => Ok(PaymentStatus::Paid),
            _ => Err(OrderError::InvalidRequest(format!(
                "unknown payment status: {}",
                value
            ))),
        }
    }
}

/// How the buyer settles the order. `Vnpay` is the redirect/callback gateway flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cod,
    Vnpay,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "COD",
            PaymentMethod::Vnpay => "VNPAY",
        }
    }

    pub fn is_gateway(&self) -> bool {
        matches!(self, PaymentMethod::Vnpay)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "COD" => Ok(PaymentMethod::Cod),
            "VNPAY" => Ok(PaymentMethod::Vnpay),
            _ => Err(OrderError::InvalidRequest(format!(
                "unsupported payment method: {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLineItem {
    pub book_id: i64,
    pub title: String,
    pub quantity: i32,
    /// Catalog price at checkout time.
    pub unit_price: BigDecimal,
}

impl OrderLineItem {
    pub fn subtotal(&self) -> BigDecimal {
        &self.unit_price * BigDecimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receiver {
    pub name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_code: String,
    pub user_id: i64,
    pub buyer_email: String,
    pub receiver: Receiver,
    pub note: Option<String>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_price: BigDecimal,
    pub items: Vec<OrderLineItem>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub transaction_ref: Option<String>,
}

impl Order {
    /// Gateway orders that still hold reserved stock while waiting for the callback.
    pub fn is_awaiting_gateway_payment(&self) -> bool {
        self.status == OrderStatus::Pending
            && self.payment_status == PaymentStatus::Unpaid
            && self.payment_method.is_gateway()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    /// Whether a cancellation would still release stock.
    pub fn is_cancellable(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Processing)
            && self.payment_status == PaymentStatus::Unpaid
    }

    pub fn computed_total(&self) -> BigDecimal {
        sum_line_items(&self.items)
    }
}

/// A validated order ready to be persisted. Stock for every item is already reserved.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_code: String,
    pub user_id: i64,
    pub buyer_email: String,
    pub receiver: Receiver,
    pub note: Option<String>,
    pub payment_method: PaymentMethod,
    pub total_price: BigDecimal,
    pub items: Vec<OrderLineItem>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewOrder {
    pub fn into_order(self) -> Order {
        Order {
            order_code: self.order_code,
            user_id: self.user_id,
            buyer_email: self.buyer_email,
            receiver: self.receiver,
            note: self.note,
            status: OrderStatus::Pending,
            payment_method: self.payment_method,
            payment_status: PaymentStatus::Unpaid,
            total_price: self.total_price,
            items: self.items,
            created_at: self.created_at,
            expires_at: self.expires_at,
            transaction_ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub book_id: i64,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_address: String,
    pub note: Option<String>,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderItemRequest>,
    pub total_price: BigDecimal,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::InvalidRequest(
                "order must contain at least one item".to_string(),
            ));
        }
        if let Some(item) = self.items.iter().find(|item| item.quantity <= 0) {
            return Err(OrderError::InvalidRequest(format!(
                "quantity for book {} must be greater than zero",
                item.book_id
            )));
        }
        if self.receiver_name.trim().is_empty() {
            return Err(OrderError::InvalidRequest(
                "receiver name is required".to_string(),
            ));
        }
        if self.receiver_phone.trim().is_empty() {
            return Err(OrderError::InvalidRequest(
                "receiver phone is required".to_string(),
            ));
        }
        if self.receiver_address.trim().is_empty() {
            return Err(OrderError::InvalidRequest(
                "receiver address is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn receiver(&self) -> Receiver {
        Receiver {
            name: self.receiver_name.trim().to_string(),
            phone: self.receiver_phone.trim().to_string(),
            address: self.receiver_address.trim().to_string(),
        }
    }
}

pub fn sum_line_items(items: &[OrderLineItem]) -> BigDecimal {
    items
        .iter()
        .fold(BigDecimal::from(0), |acc, item| acc + item.subtotal())
}

/// `ORD-<YYYYMMDDHHMMSS>-<6 uppercase alphanumerics>`
pub fn generate_order_code(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| (b as char).to_ascii_uppercase())
        .take(ORDER_CODE_SUFFIX_LEN)
        .collect();
    format!(
        "{}-{}-{}",
        ORDER_CODE_PREFIX,
        now.format("%Y%m%d%H%M%S"),
        suffix
    )
}
