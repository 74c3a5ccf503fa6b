//! Canonical parameter encoding and HMAC-SHA512 signing shared by the outbound payment URL
//! and the inbound callback check. Both directions must go through [`canonical_query`] so a
//! URL we sign is byte-for-byte the input the gateway signs back.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::collections::BTreeMap;
use url::form_urlencoded;

use crate::payments::error::{PaymentError, PaymentResult};

type HmacSha512 = Hmac<Sha512>;

/// Form-style percent encoding: alphanumerics and `*-._` pass through, space becomes `+`.
///
/// The gateway charset is ASCII and every parameter built by this crate is ASCII. Anything
/// else is percent-encoded as its UTF-8 bytes; signing and verification both encode through
/// here, so a non-ASCII value produces the same canonical bytes in either direction.
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `name=encode(value)` pairs in ordinal name order, empty values skipped, joined by `&`.
///
/// `BTreeMap` iterates in byte order of the keys, which is the ordering the gateway uses.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{}={}", name, encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex HMAC-SHA512 of `payload`.
pub fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> PaymentResult<String> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).map_err(|e| PaymentError::ConfigurationError {
            message: format!("invalid signing key: {}", e),
        })?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Hex case is ignored; the gateway is free to send upper-case digests.
pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = match sign_hmac_sha512_hex(payload, secret) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let supplied = signature.trim().to_ascii_lowercase();
    secure_eq(computed.as_bytes(), supplied.as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
