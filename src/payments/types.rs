use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payments::error::{PaymentError, PaymentResult};

/// Gateway response code meaning the payment was captured.
pub const RESPONSE_CODE_SUCCESS: &str = "00";

/// A signed redirect for one payment attempt. Regenerated on every retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentSession {
    pub order_code: String,
    pub transaction_ref: String,
    /// Amount in minor units (price × 100).
    pub amount_minor: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub secure_hash: String,
    pub payment_url: String,
}

/// A verified gateway callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayCallback {
    pub transaction_ref: String,
    pub order_code: String,
    pub response_code: String,
    pub amount_minor: i64,
    pub transaction_no: Option<String>,
    pub bank_code: Option<String>,
}

impl GatewayCallback {
    pub fn is_success(&self) -> bool {
        self.response_code == RESPONSE_CODE_SUCCESS
    }
}

/// `orderCode_epochMillis`
pub fn transaction_ref(order_code: &str, created_at: DateTime<Utc>) -> String {
    format!("{}_{}", order_code, created_at.timestamp_millis())
}

/// Order code encoded in a transaction reference. Split at the last `_` so order codes that
/// contain underscores survive.
pub fn order_code_from_ref(transaction_ref: &str) -> PaymentResult<&str> {
    match transaction_ref.rsplit_once('_') {
        Some((code, millis))
            if !code.is_empty() && !millis.is_empty() && millis.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Ok(code)
        }
        _ => Err(PaymentError::malformed(
            format!("unrecognised transaction reference: {}", transaction_ref),
            "vnp_TxnRef",
        )),
    }
}

/// Price × 100 as an integer. Fractions of a minor unit are rejected.
pub fn to_minor_units(amount: &BigDecimal) -> PaymentResult<i64> {
    if amount < &BigDecimal::from(0) {
        return Err(PaymentError::validation("amount must not be negative", "amount"));
    }
    let scaled = amount * BigDecimal::from(100);
    if !scaled.is_integer() {
        return Err(PaymentError::validation(
            format!("amount {} has more than two decimal places", amount),
            "amount",
        ));
    }
    scaled
        .to_i64()
        .ok_or_else(|| PaymentError::validation(format!("amount {} is too large", amount), "amount"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn minor_units_are_price_times_one_hundred() {
        assert_eq!(to_minor_units(&BigDecimal::from(150000)).unwrap(), 15_000_000);
        assert_eq!(
            to_minor_units(&BigDecimal::from_str("12.34").unwrap()).unwrap(),
            1234
        );
        assert!(to_minor_units(&BigDecimal::from_str("0.001").unwrap()).is_err());
        assert!(to_minor_units(&BigDecimal::from(-1)).is_err());
    }

    #[test]
    fn transaction_ref_carries_the_order_code() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let reference = transaction_ref("ORD-20240301170000-AB12CD", at);
        assert_eq!(reference, "ORD-20240301170000-AB12CD_1709287200000");
        assert_eq!(
            order_code_from_ref(&reference).unwrap(),
            "ORD-20240301170000-AB12CD"
        );
    }

    #[test]
    fn order_code_with_underscore_survives() {
        assert_eq!(order_code_from_ref("ORD_X_123").unwrap(), "ORD_X");
    }

    #[test]
    fn malformed_references_are_rejected() {
        assert!(order_code_from_ref("ORD-1").is_err());
        assert!(order_code_from_ref("ORD-1_").is_err());
        assert!(order_code_from_ref("_123").is_err());
        assert!(order_code_from_ref("ORD-1_12a").is_err());
    }
}
