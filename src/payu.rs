//! PayU signed-form protocol: outbound request hashing, inbound reverse-hash
//! verification, transaction ids, and the browser-redirect whitelist.
//!
//! There is exactly one verification function; the validate endpoint and the
//! webhook are thin transports over it so the two can never disagree about
//! what counts as authentic.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::config::PayuConfig;

/// Outbound fields the merchant signs and posts to the gateway. `udf1`
/// carries our order id through the opaque round-trip.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub txn_id: String,
    pub amount: Decimal,
    pub product_info: String,
    pub firstname: String,
    pub email: String,
    pub phone: String,
    pub udf1: String,
    pub udf2: String,
    pub udf3: String,
    pub udf4: String,
    pub udf5: String,
}

/// Everything the gateway can POST back. Unknown fields are ignored on
/// deserialization; absent ones hash as empty strings, which is what PayU
/// itself does.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub txnid: Option<String>,
    #[serde(default)]
    pub mihpayid: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub productinfo: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub additional_charges: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub bankcode: Option<String>,
    #[serde(default)]
    pub bank_ref_no: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "error_Message")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub udf1: Option<String>,
    #[serde(default)]
    pub udf2: Option<String>,
    #[serde(default)]
    pub udf3: Option<String>,
    #[serde(default)]
    pub udf4: Option<String>,
    #[serde(default)]
    pub udf5: Option<String>,
}

impl GatewayResponse {
    fn f(opt: &Option<String>) -> &str {
        opt.as_deref().unwrap_or("")
    }
}

fn sha512_hex(payload: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `TXN{epochMillis}{9 random alphanumerics}`.
pub fn new_txn_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("TXN{millis}{suffix}")
}

pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Request hash:
/// `key|txnid|amount|productinfo|firstname|email|udf1|..|udf5||||||salt`
/// (five empty fields between udf5 and the salt), SHA-512 lower-hex.
pub fn request_hash(cfg: &PayuConfig, req: &PaymentRequest) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}||||||{}",
        cfg.merchant_key,
        req.txn_id,
        format_amount(req.amount),
        req.product_info,
        req.firstname,
        req.email,
        req.udf1,
        req.udf2,
        req.udf3,
        req.udf4,
        req.udf5,
        cfg.merchant_salt,
    );
    sha512_hex(&payload)
}

/// All fields of the self-submitting form POSTed to `{base}/_payment`,
/// including the three pre-registered callback URLs and the hash.
pub fn build_payment_form(cfg: &PayuConfig, req: &PaymentRequest) -> Vec<(String, String)> {
    let hash = request_hash(cfg, req);
    vec![
        ("key".into(), cfg.merchant_key.clone()),
        ("txnid".into(), req.txn_id.clone()),
        ("amount".into(), format_amount(req.amount)),
        ("productinfo".into(), req.product_info.clone()),
        ("firstname".into(), req.firstname.clone()),
        ("email".into(), req.email.clone()),
        ("phone".into(), req.phone.clone()),
        ("udf1".into(), req.udf1.clone()),
        ("udf2".into(), req.udf2.clone()),
        ("udf3".into(), req.udf3.clone()),
        ("udf4".into(), req.udf4.clone()),
        ("udf5".into(), req.udf5.clone()),
        ("surl".into(), cfg.success_url.clone()),
        ("furl".into(), cfg.failure_url.clone()),
        ("curl".into(), cfg.cancel_url.clone()),
        ("hash".into(), hash),
    ]
}

/// Reverse hash over the response fields, mirror order of the request hash;
/// `additional_charges` is prepended only when the gateway sent it.
pub fn response_hash(cfg: &PayuConfig, resp: &GatewayResponse) -> String {
    let core = format!(
        "{}|{}||||||{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        cfg.merchant_salt,
        GatewayResponse::f(&resp.status),
        GatewayResponse::f(&resp.udf5),
        GatewayResponse::f(&resp.udf4),
        GatewayResponse::f(&resp.udf3),
        GatewayResponse::f(&resp.udf2),
        GatewayResponse::f(&resp.udf1),
        GatewayResponse::f(&resp.email),
        GatewayResponse::f(&resp.firstname),
        GatewayResponse::f(&resp.productinfo),
        GatewayResponse::f(&resp.amount),
        GatewayResponse::f(&resp.txnid),
        GatewayResponse::f(&resp.key),
    );
    let payload = match resp.additional_charges.as_deref() {
        Some(charges) if !charges.is_empty() => format!("{charges}|{core}"),
        _ => core,
    };
    sha512_hex(&payload)
}

/// Compares the received hash against our own computation,
/// case-insensitively. A missing hash never verifies.
pub fn verify_response(cfg: &PayuConfig, resp: &GatewayResponse) -> bool {
    match resp.hash.as_deref() {
        Some(received) if !received.is_empty() => {
            response_hash(cfg, resp).eq_ignore_ascii_case(received)
        }
        _ => false,
    }
}

/// Fields the return handler is allowed to forward to the destination page.
/// Everything else the gateway sends is dropped.
pub const FORWARD_WHITELIST: &[&str] = &[
    "txnid",
    "mihpayid",
    "status",
    "amount",
    "hash",
    "key",
    "mode",
    "bankcode",
    "bank_ref_no",
    "error",
    "error_Message",
    "productinfo",
    "email",
    "firstname",
    "udf1",
    "udf2",
    "udf3",
    "udf4",
    "udf5",
];

/// Projects the raw gateway POST down to the whitelisted query parameters,
/// in whitelist order.
pub fn whitelist_params(raw: &HashMap<String, String>) -> Vec<(String, String)> {
    FORWARD_WHITELIST
        .iter()
        .filter_map(|&name| raw.get(name).map(|v| (name.to_string(), v.clone())))
        .collect()
}

/// Destination page for the browser redirect, from the claimed status. The
/// claimed status is only used for routing; authenticity is decided by the
/// validate endpoint afterwards.
pub fn redirect_outcome(status: &str) -> &'static str {
    match status.to_ascii_lowercase().as_str() {
        "success" => "success",
        "cancel" | "cancelled" => "cancel",
        _ => "failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> PayuConfig {
        PayuConfig {
            merchant_key: "gtKFFx".to_string(),
            merchant_salt: "eCwWELxi".to_string(),
            base_url: "https://sandboxsecure.payu.in".to_string(),
            success_url: "http://localhost:8083/api/v1/payments/return".to_string(),
            failure_url: "http://localhost:8083/api/v1/payments/return".to_string(),
            cancel_url: "http://localhost:8083/api/v1/payments/return".to_string(),
        }
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            txn_id: "TXN1700000000000abc123xyz".to_string(),
            amount: dec!(1499.50),
            product_info: "Sable jewellery order".to_string(),
            firstname: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            phone: "9999999999".to_string(),
            udf1: "SAB000042".to_string(),
            udf2: String::new(),
            udf3: String::new(),
            udf4: String::new(),
            udf5: String::new(),
        }
    }

    fn response_for(cfg: &PayuConfig, status: &str) -> GatewayResponse {
        let mut resp = GatewayResponse {
            status: Some(status.to_string()),
            txnid: Some("TXN1700000000000abc123xyz".to_string()),
            mihpayid: Some("403993715531553289".to_string()),
            amount: Some("1499.50".to_string()),
            productinfo: Some("Sable jewellery order".to_string()),
            firstname: Some("Asha".to_string()),
            email: Some("asha@example.com".to_string()),
            key: Some(cfg.merchant_key.clone()),
            udf1: Some("SAB000042".to_string()),
            ..GatewayResponse::default()
        };
        resp.hash = Some(response_hash(cfg, &resp));
        resp
    }

    #[test]
    fn request_hash_is_deterministic_lower_hex() {
        let cfg = cfg();
        let req = request();
        let h1 = request_hash(&cfg, &req);
        let h2 = request_hash(&cfg, &req);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 128); // SHA-512 as hex
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn request_hash_changes_with_any_field() {
        let cfg = cfg();
        let req = request();
        let base = request_hash(&cfg, &req);
        let mut other = request();
        other.amount = dec!(1499.51);
        assert_ne!(base, request_hash(&cfg, &other));
        let mut other = request();
        other.udf1 = "SAB000043".to_string();
        assert_ne!(base, request_hash(&cfg, &other));
    }

    #[test]
    fn form_carries_hash_and_callbacks() {
        let cfg = cfg();
        let req = request();
        let form = build_payment_form(&cfg, &req);
        let get = |k: &str| form.iter().find(|(n, _)| n == k).map(|(_, v)| v.clone());
        assert_eq!(get("amount").unwrap(), "1499.50");
        assert_eq!(get("hash").unwrap(), request_hash(&cfg, &req));
        assert_eq!(get("surl").unwrap(), cfg.success_url);
        assert_eq!(get("furl").unwrap(), cfg.failure_url);
        assert_eq!(get("curl").unwrap(), cfg.cancel_url);
        assert_eq!(cfg.payment_url(), "https://sandboxsecure.payu.in/_payment");
    }

    #[test]
    fn valid_response_verifies() {
        let cfg = cfg();
        let resp = response_for(&cfg, "success");
        assert!(verify_response(&cfg, &resp));
    }

    #[test]
    fn uppercase_hash_still_verifies() {
        let cfg = cfg();
        let mut resp = response_for(&cfg, "success");
        resp.hash = resp.hash.map(|h| h.to_uppercase());
        assert!(verify_response(&cfg, &resp));
    }

    #[test]
    fn flipping_one_hash_character_fails() {
        let cfg = cfg();
        let mut resp = response_for(&cfg, "success");
        let mut hash = resp.hash.take().unwrap();
        let first = hash.remove(0);
        let flipped = if first == '0' { '1' } else { '0' };
        resp.hash = Some(format!("{flipped}{hash}"));
        assert!(!verify_response(&cfg, &resp));
    }

    #[test]
    fn tampered_status_fails_verification() {
        let cfg = cfg();
        let mut resp = response_for(&cfg, "failure");
        resp.status = Some("success".to_string());
        assert!(!verify_response(&cfg, &resp));
    }

    #[test]
    fn missing_hash_never_verifies() {
        let cfg = cfg();
        let mut resp = response_for(&cfg, "success");
        resp.hash = None;
        assert!(!verify_response(&cfg, &resp));
    }

    #[test]
    fn additional_charges_are_prepended_when_present() {
        let cfg = cfg();
        let mut resp = response_for(&cfg, "success");
        let without = response_hash(&cfg, &resp);
        resp.additional_charges = Some("25.00".to_string());
        let with = response_hash(&cfg, &resp);
        assert_ne!(without, with);
        resp.hash = Some(with);
        assert!(verify_response(&cfg, &resp));
    }

    #[test]
    fn txn_id_format() {
        let id = new_txn_id();
        assert!(id.starts_with("TXN"));
        assert!(id.len() > 3 + 13); // millis plus 9-char suffix
        assert!(id[3..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn whitelist_drops_unknown_fields() {
        let mut raw = HashMap::new();
        raw.insert("txnid".to_string(), "TXN1".to_string());
        raw.insert("status".to_string(), "success".to_string());
        raw.insert("PG_TYPE".to_string(), "CC".to_string());
        raw.insert("cardnum".to_string(), "512345XXXXXX2346".to_string());
        let params = whitelist_params(&raw);
        assert!(params.iter().any(|(k, _)| k == "txnid"));
        assert!(params.iter().any(|(k, _)| k == "status"));
        assert!(!params.iter().any(|(k, _)| k == "PG_TYPE" || k == "cardnum"));
    }

    #[test]
    fn redirect_outcomes() {
        assert_eq!(redirect_outcome("success"), "success");
        assert_eq!(redirect_outcome("cancel"), "cancel");
        assert_eq!(redirect_outcome("cancelled"), "cancel");
        assert_eq!(redirect_outcome("failure"), "failure");
        assert_eq!(redirect_outcome("anything-else"), "failure");
    }
}
