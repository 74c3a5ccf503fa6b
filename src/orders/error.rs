use thiserror::Error;

use crate::database::error::StoreError;
use crate::payments::error::PaymentError;
use crate::orders::types::{OrderStatus, PaymentStatus};

pub type OrderResult<T> = Result<T, OrderError>;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("User not found: {email}")]
    UserNotFound { email: String },

    #[error("Book not found: {book_id}")]
    BookNotFound { book_id: i64 },

    #[error("Order not found: {order_code}")]
    OrderNotFound { order_code: String },

    #[error("Insufficient stock for {title}")]
    InsufficientStock { book_id: i64, title: String },

    #[error("Cannot {operation} order {order_code} in state {status}/{payment_status}")]
    InvalidState {
        order_code: String,
        status: OrderStatus,
        payment_status: PaymentStatus,
        operation: &'static str,
    },

    #[error("Invalid payment callback signature")]
    SignatureInvalid,

    #[error("Payment window for order {order_code} has expired")]
    PaymentExpired { order_code: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Order total {submitted} does not match computed total {computed}")]
    TotalMismatch { submitted: String, computed: String },

    #[error("Paid amount {paid} does not match order amount {expected} for {order_code}")]
    AmountMismatch {
        order_code: String,
        expected: i64,
        paid: i64,
    },

    #[error("Payment gateway error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    pub fn invalid_state(
        order_code: &str,
        status: OrderStatus,
        payment_status: PaymentStatus,
        operation: &'static str,
    ) -> Self {
        OrderError::InvalidState {
            order_code: order_code.to_string(),
            status,
            payment_status,
            operation,
        }
    }

    /// Client mistakes, as opposed to store or connectivity failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            OrderError::Store(_) | OrderError::Payment(PaymentError::ConfigurationError { .. })
        )
    }
}
