//! Order, inventory and payment reconciliation for the bookstore backend.
//!
//! Checkout reserves stock atomically, gateway orders are paid through a signed
//! redirect/callback exchange, and unpaid gateway orders are swept back into stock once
//! their payment window closes.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod orders;
pub mod payments;
pub mod services;
pub mod workers;
