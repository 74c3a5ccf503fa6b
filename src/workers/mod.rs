pub mod order_expiry;
