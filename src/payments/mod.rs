//! Redirect/callback payment gateway support.

pub mod error;
pub mod provider;
pub mod signing;
pub mod types;
pub mod vnpay;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentGateway;
pub use types::{GatewayCallback, PaymentSession};
pub use vnpay::{VnpayConfig, VnpayGateway};
