//! API-facing error handling for the bookstore order service
//!
//! Maps domain, gateway and store failures onto HTTP status codes, machine-readable error
//! codes and user-facing messages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::StoreError;
use crate::orders::OrderError;
use crate::payments::PaymentError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "BOOK_NOT_FOUND")]
    BookNotFound,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "INSUFFICIENT_STOCK")]
    InsufficientStock,
    #[serde(rename = "INVALID_ORDER_STATE")]
    InvalidOrderState,
    #[serde(rename = "PAYMENT_EXPIRED")]
    PaymentExpired,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "TOTAL_MISMATCH")]
    TotalMismatch,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    UserNotFound { email: String },
    BookNotFound { book_id: i64 },
    OrderNotFound { order_code: String },
    InsufficientStock { book_id: i64, title: String },
    /// The order is in a state that does not allow the requested operation
    InvalidOrderState { order_code: String, detail: String },
    /// Gateway payment window has closed
    PaymentExpired { order_code: String },
    /// Callback signature missing or wrong
    InvalidSignature,
    TotalMismatch { submitted: String, computed: String },
    AmountMismatch { order_code: String, expected: i64, paid: i64 },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Request body or parameters failed validation
    InvalidRequest { message: String },
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn missing_field(field: &str) -> Self {
        AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.to_string(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => 404,
                DomainError::BookNotFound { .. } => 404,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::InsufficientStock { .. } => 409, // Conflict
                DomainError::InvalidOrderState { .. } => 409,
                DomainError::PaymentExpired { .. } => 410, // Gone
                DomainError::InvalidSignature => 401,
                DomainError::TotalMismatch { .. } => 422, // Unprocessable Entity
                DomainError::AmountMismatch { .. } => 422,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::BookNotFound { .. } => ErrorCode::BookNotFound,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
                DomainError::InvalidOrderState { .. } => ErrorCode::InvalidOrderState,
                DomainError::PaymentExpired { .. } => ErrorCode::PaymentExpired,
                DomainError::InvalidSignature => ErrorCode::InvalidSignature,
                DomainError::TotalMismatch { .. } => ErrorCode::TotalMismatch,
                DomainError::AmountMismatch { .. } => ErrorCode::InvalidAmount,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::UserNotFound { email } => format!("User '{}' not found", email),
                DomainError::BookNotFound { book_id } => format!("Book {} not found", book_id),
                DomainError::OrderNotFound { order_code } => {
                    format!("Order '{}' not found", order_code)
                }
                DomainError::InsufficientStock { title, .. } => {
                    format!("Insufficient stock for {}", title)
                }
                DomainError::InvalidOrderState { detail, .. } => detail.clone(),
                DomainError::PaymentExpired { order_code } => format!(
                    "Payment window for order '{}' has expired. Please place a new order",
                    order_code
                ),
                DomainError::InvalidSignature => "Invalid payment signature".to_string(),
                DomainError::TotalMismatch {
                    submitted,
                    computed,
                } => format!(
                    "Order total {} does not match current prices (expected {})",
                    submitted, computed
                ),
                DomainError::AmountMismatch { order_code, .. } => {
                    format!("Paid amount does not match order '{}'", order_code)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidRequest { message } => message.clone(),
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            is_retryable: err.is_retryable(),
            message: err.to_string(),
        }))
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let kind = match err {
            PaymentError::ConfigurationError { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            PaymentError::CallbackVerificationError { .. } => {
                AppErrorKind::Domain(DomainError::InvalidSignature)
            }
            other => AppErrorKind::Validation(ValidationError::InvalidRequest {
                message: other.user_message(),
            }),
        };
        AppError::new(kind)
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        let kind = match err {
            OrderError::UserNotFound { email } => {
                AppErrorKind::Domain(DomainError::UserNotFound { email })
            }
            OrderError::BookNotFound { book_id } => {
                AppErrorKind::Domain(DomainError::BookNotFound { book_id })
            }
            OrderError::OrderNotFound { order_code } => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_code })
            }
            OrderError::InsufficientStock { book_id, title } => {
                AppErrorKind::Domain(DomainError::InsufficientStock { book_id, title })
            }
            ref e @ OrderError::InvalidState { ref order_code, .. } => {
                AppErrorKind::Domain(DomainError::InvalidOrderState {
                    order_code: order_code.clone(),
                    detail: e.to_string(),
                })
            }
            OrderError::SignatureInvalid => AppErrorKind::Domain(DomainError::InvalidSignature),
            OrderError::PaymentExpired { order_code } => {
                AppErrorKind::Domain(DomainError::PaymentExpired { order_code })
            }
            OrderError::InvalidRequest(message) => {
                AppErrorKind::Validation(ValidationError::InvalidRequest { message })
            }
            OrderError::TotalMismatch {
                submitted,
                computed,
            } => AppErrorKind::Domain(DomainError::TotalMismatch {
                submitted,
                computed,
            }),
            OrderError::AmountMismatch {
                order_code,
                expected,
                paid,
            } => AppErrorKind::Domain(DomainError::AmountMismatch {
                order_code,
                expected,
                paid,
            }),
            OrderError::Payment(e) => return AppError::from(e),
            OrderError::Store(e) => return AppError::from(e),
        };
        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderStatus, PaymentStatus};

    #[test]
    fn test_insufficient_stock_error() {
        let error = AppError::from(OrderError::InsufficientStock {
            book_id: 3,
            title: "Dune".to_string(),
        });

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::InsufficientStock);
        assert_eq!(error.user_message(), "Insufficient stock for Dune");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_invalid_state_keeps_detail() {
        let error = AppError::from(OrderError::invalid_state(
            "ORD-1",
            OrderStatus::Cancelled,
            PaymentStatus::Unpaid,
            "confirm payment for",
        ));

        assert_eq!(error.status_code(), 409);
        assert!(error.user_message().contains("CANCELLED"));
    }

    #[test]
    fn test_signature_and_expiry_codes() {
        assert_eq!(AppError::from(OrderError::SignatureInvalid).status_code(), 401);
        assert_eq!(
            AppError::from(OrderError::PaymentExpired {
                order_code: "ORD-1".to_string()
            })
            .status_code(),
            410
        );
    }

    #[test]
    fn test_store_errors_are_internal() {
        let error = AppError::from(OrderError::Store(StoreError::Database(
            sqlx::Error::PoolTimedOut,
        )));

        assert_eq!(error.status_code(), 500);
        assert_eq!(error.error_code(), ErrorCode::DatabaseError);
        assert!(error.is_retryable());
        assert!(!error.user_message().contains("pool"));
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::from(OrderError::InvalidRequest(
            "order must contain at least one item".to_string(),
        ));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
    }
}
