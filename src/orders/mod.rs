//! Order aggregate: lifecycle statuses, line items and the domain error taxonomy.

pub mod error;
pub mod types;

pub use error::{OrderError, OrderResult};
pub use types::{
    generate_order_code, CreateOrderRequest, NewOrder, Order, OrderItemRequest, OrderLineItem,
    OrderStatus, PaymentMethod, PaymentStatus, Receiver,
};
