use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::orders::Order;
use crate::payments::error::PaymentResult;
use crate::payments::types::{GatewayCallback, PaymentSession};

/// Redirect-and-callback payment gateway. Building and checking signatures is local work,
/// so none of this talks to the network.
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Signed redirect URL for one payment attempt on `order`.
    fn build_payment_url(
        &self,
        order: &Order,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<PaymentSession>;

    /// `false` for a missing or mismatching signature.
    fn verify_callback(&self, params: &BTreeMap<String, String>) -> bool;

    /// Extract the fields the order service needs. Call only after [`verify_callback`].
    ///
    /// [`verify_callback`]: PaymentGateway::verify_callback
    fn parse_callback(&self, params: &BTreeMap<String, String>) -> PaymentResult<GatewayCallback>;
}
