pub mod clock;
pub mod notification;
pub mod order_service;
