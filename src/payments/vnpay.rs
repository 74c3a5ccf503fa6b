use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::orders::Order;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::signing::{canonical_query, sign_hmac_sha512_hex, verify_hmac_sha512_hex};
use crate::payments::types::{
    order_code_from_ref, to_minor_units, transaction_ref, GatewayCallback, PaymentSession,
};

pub const SECURE_HASH_PARAM: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE_PARAM: &str = "vnp_SecureHashType";

const VERSION: &str = "2.1.0";
const COMMAND_PAY: &str = "pay";
const CURRENCY: &str = "VND";
const GATEWAY_UTC_OFFSET_SECS: i32 = 7 * 3600;
const GATEWAY_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    pub return_url: String,
    pub locale: String,
    pub order_type: String,
    /// Lifetime of the gateway-side payment page, independent of the order payment window.
    pub session_ttl_minutes: i64,
}

impl Default for VnpayConfig {
    fn default() -> Self {
        Self {
            tmn_code: String::new(),
            hash_secret: String::new(),
            pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            return_url: "http://localhost:8000/api/payments/vnpay-return".to_string(),
            locale: "vn".to_string(),
            order_type: "other".to_string(),
            session_ttl_minutes: 10,
        }
    }
}

impl VnpayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PaymentError::ConfigurationError {
                    message: format!("{} environment variable is required", name),
                })
        };
        let defaults = Self::default();

        Ok(Self {
            tmn_code: required("VNPAY_TMN_CODE")?,
            hash_secret: required("VNPAY_HASH_SECRET")?,
            pay_url: std::env::var("VNPAY_PAY_URL").unwrap_or(defaults.pay_url),
            return_url: std::env::var("VNPAY_RETURN_URL").unwrap_or(defaults.return_url),
            locale: std::env::var("VNPAY_LOCALE").unwrap_or(defaults.locale),
            order_type: std::env::var("VNPAY_ORDER_TYPE").unwrap_or(defaults.order_type),
            session_ttl_minutes: std::env::var("VNPAY_SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(defaults.session_ttl_minutes),
        })
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if self.tmn_code.trim().is_empty() || self.hash_secret.is_empty() {
            return Err(PaymentError::ConfigurationError {
                message: "terminal code and hash secret must be set".to_string(),
            });
        }
        if !self.pay_url.starts_with("http") || !self.return_url.starts_with("http") {
            return Err(PaymentError::ConfigurationError {
                message: "pay and return URLs must be absolute http(s) URLs".to_string(),
            });
        }
        if self.session_ttl_minutes <= 0 {
            return Err(PaymentError::ConfigurationError {
                message: "session ttl must be positive".to_string(),
            });
        }
        Ok(())
    }
}

pub struct VnpayGateway {
    config: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> PaymentResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(VnpayConfig::from_env()?)
    }

    /// `yyyyMMddHHmmss` in GMT+7.
    pub fn format_gateway_time(at: DateTime<Utc>) -> PaymentResult<String> {
        let offset = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS).ok_or_else(|| {
            PaymentError::ConfigurationError {
                message: "invalid gateway timezone offset".to_string(),
            }
        })?;
        Ok(at.with_timezone(&offset).format(GATEWAY_TIME_FORMAT).to_string())
    }

    /// Signature over the canonical query of every parameter except the hash fields.
    pub fn sign(&self, params: &BTreeMap<String, String>) -> PaymentResult<String> {
        sign_hmac_sha512_hex(canonical_query(params).as_bytes(), &self.config.hash_secret)
    }

    fn required_param<'a>(
        params: &'a BTreeMap<String, String>,
        name: &str,
    ) -> PaymentResult<&'a str> {
        params
            .get(name)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PaymentError::malformed(format!("{} is required", name), name))
    }
}

impl PaymentGateway for VnpayGateway {
    fn name(&self) -> &'static str {
        "vnpay"
    }

    fn build_payment_url(
        &self,
        order: &Order,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<PaymentSession> {
        let amount_minor = to_minor_units(&order.total_price)?;
        let reference = transaction_ref(&order.order_code, now);
        let expires_at = now + Duration::minutes(self.config.session_ttl_minutes);

        let mut params: BTreeMap<String, String> = BTreeMap::new();
        let mut put = |name: &str, value: String| {
            params.insert(name.to_string(), value);
        };
        put("vnp_Version", VERSION.to_string());
        put("vnp_Command", COMMAND_PAY.to_string());
        put("vnp_TmnCode", self.config.tmn_code.clone());
        put("vnp_Amount", amount_minor.to_string());
        put("vnp_CurrCode", CURRENCY.to_string());
        put("vnp_TxnRef", reference.clone());
        put(
            "vnp_OrderInfo",
            format!("Thanh toan don hang {}", order.order_code),
        );
        put("vnp_OrderType", self.config.order_type.clone());
        put("vnp_Locale", self.config.locale.clone());
        put("vnp_ReturnUrl", self.config.return_url.clone());
        put("vnp_IpAddr", client_ip.to_string());
        put("vnp_CreateDate", Self::format_gateway_time(now)?);
        put("vnp_ExpireDate", Self::format_gateway_time(expires_at)?);

        let query = canonical_query(&params);
        let secure_hash = sign_hmac_sha512_hex(query.as_bytes(), &self.config.hash_secret)?;
        let payment_url = format!(
            "{}?{}&{}={}",
            self.config.pay_url, query, SECURE_HASH_PARAM, secure_hash
        );

        debug!(
            order_code = %order.order_code,
            transaction_ref = %reference,
            amount_minor,
            "payment url built"
        );

        Ok(PaymentSession {
            order_code: order.order_code.clone(),
            transaction_ref: reference,
            amount_minor,
            created_at: now,
            expires_at,
            secure_hash,
            payment_url,
        })
    }

    fn verify_callback(&self, params: &BTreeMap<String, String>) -> bool {
        let Some(signature) = params.get(SECURE_HASH_PARAM).filter(|v| !v.is_empty()) else {
            warn!("payment callback without signature");
            return false;
        };
        let mut signed = params.clone();
        signed.remove(SECURE_HASH_PARAM);
        signed.remove(SECURE_HASH_TYPE_PARAM);

        let valid = verify_hmac_sha512_hex(
            canonical_query(&signed).as_bytes(),
            &self.config.hash_secret,
            signature,
        );
        if !valid {
            warn!(
                transaction_ref = params.get("vnp_TxnRef").map(String::as_str).unwrap_or(""),
                "payment callback signature mismatch"
            );
        }
        valid
    }

    fn parse_callback(&self, params: &BTreeMap<String, String>) -> PaymentResult<GatewayCallback> {
        let reference = Self::required_param(params, "vnp_TxnRef")?;
        let order_code = order_code_from_ref(reference)?;
        let response_code = Self::required_param(params, "vnp_ResponseCode")?;
        let amount_minor = Self::required_param(params, "vnp_Amount")?
            .trim()
            .parse::<i64>()
            .map_err(|_| PaymentError::malformed("vnp_Amount is not an integer", "vnp_Amount"))?;

        let optional = |name: &str| params.get(name).filter(|v| !v.is_empty()).cloned();

        Ok(GatewayCallback {
            transaction_ref: reference.to_string(),
            order_code: order_code.to_string(),
            response_code: response_code.to_string(),
            amount_minor,
            transaction_no: optional("vnp_TransactionNo"),
            bank_code: optional("vnp_BankCode"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderStatus, PaymentMethod, PaymentStatus, Receiver};
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;

    fn gateway() -> VnpayGateway {
        VnpayGateway::new(VnpayConfig {
            tmn_code: "TESTTMN1".to_string(),
            hash_secret: "SECRETKEY".to_string(),
            ..VnpayConfig::default()
        })
        .unwrap()
    }

    fn order(total: i64) -> Order {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        Order {
            order_code: "ORD-20240301100000-AB12CD".to_string(),
            user_id: 1,
            buyer_email: "reader@example.com".to_string(),
            receiver: Receiver {
                name: "Reader".to_string(),
                phone: "0900000000".to_string(),
                address: "1 Book St".to_string(),
            },
            note: None,
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Vnpay,
            payment_status: PaymentStatus::Unpaid,
            total_price: BigDecimal::from(total),
            items: vec![],
            created_at,
            expires_at: Some(created_at + Duration::minutes(2)),
            transaction_ref: None,
        }
    }

    fn query_params(url: &str) -> BTreeMap<String, String> {
        let parsed = url::Url::parse(url).unwrap();
        parsed.query_pairs().into_owned().collect()
    }

    #[test]
    fn payment_url_carries_amount_in_minor_units() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        let session = gateway()
            .build_payment_url(&order(150_000), "127.0.0.1", now)
            .unwrap();

        let params = query_params(&session.payment_url);
        assert_eq!(params["vnp_Amount"], "15000000");
        assert_eq!(session.amount_minor, 15_000_000);
        assert_eq!(params["vnp_CurrCode"], "VND");
        assert_eq!(params["vnp_Version"], "2.1.0");
        assert_eq!(params["vnp_TxnRef"], session.transaction_ref);
        assert!(session
            .transaction_ref
            .starts_with("ORD-20240301100000-AB12CD_"));
    }

    #[test]
    fn dates_are_rendered_in_gmt_plus_seven() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 20, 30, 5).unwrap();
        let session = gateway()
            .build_payment_url(&order(10), "127.0.0.1", now)
            .unwrap();
        let params = query_params(&session.payment_url);
        assert_eq!(params["vnp_CreateDate"], "20240302033005");
        assert_eq!(params["vnp_ExpireDate"], "20240302034005");
    }

    #[test]
    fn signature_is_last_and_unencoded() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        let session = gateway()
            .build_payment_url(&order(10), "127.0.0.1", now)
            .unwrap();
        assert!(session
            .payment_url
            .ends_with(&format!("&vnp_SecureHash={}", session.secure_hash)));
        assert_eq!(session.secure_hash.len(), 128);
    }

    #[test]
    fn own_payment_url_verifies_and_tampering_is_detected() {
        let gateway = gateway();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        let session = gateway
            .build_payment_url(&order(150_000), "127.0.0.1", now)
            .unwrap();

        let params = query_params(&session.payment_url);
        assert!(gateway.verify_callback(&params));

        let mut tampered = params.clone();
        tampered.insert("vnp_Amount".to_string(), "100".to_string());
        assert!(!gateway.verify_callback(&tampered));
    }

    #[test]
    fn hash_type_is_excluded_from_verification() {
        let gateway = gateway();
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert("vnp_TxnRef".to_string(), "ORD-1_1".to_string());
        params.insert("vnp_ResponseCode".to_string(), "00".to_string());
        let hash = gateway.sign(&params).unwrap();
        params.insert(SECURE_HASH_PARAM.to_string(), hash);
        params.insert(SECURE_HASH_TYPE_PARAM.to_string(), "HmacSHA512".to_string());
        assert!(gateway.verify_callback(&params));
    }

    #[test]
    fn missing_signature_fails_closed() {
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert("vnp_TxnRef".to_string(), "ORD-1_1".to_string());
        assert!(!gateway().verify_callback(&params));
    }

    #[test]
    fn parse_callback_extracts_order_code_and_amount() {
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert("vnp_TxnRef".to_string(), "ORD-1_1709262000000".to_string());
        params.insert("vnp_ResponseCode".to_string(), "00".to_string());
        params.insert("vnp_Amount".to_string(), "15000000".to_string());
        params.insert("vnp_TransactionNo".to_string(), "14000001".to_string());

        let callback = gateway().parse_callback(&params).unwrap();
        assert_eq!(callback.order_code, "ORD-1");
        assert_eq!(callback.amount_minor, 15_000_000);
        assert!(callback.is_success());
        assert_eq!(callback.transaction_no.as_deref(), Some("14000001"));
        assert_eq!(callback.bank_code, None);
    }

    #[test]
    fn parse_callback_requires_amount() {
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert("vnp_TxnRef".to_string(), "ORD-1_1".to_string());
        params.insert("vnp_ResponseCode".to_string(), "24".to_string());
        let err = gateway().parse_callback(&params).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedCallback { .. }));
    }

    #[test]
    fn config_requires_secret() {
        let err = VnpayGateway::new(VnpayConfig::default()).err().unwrap();
        assert!(matches!(err, PaymentError::ConfigurationError { .. }));
    }
}
