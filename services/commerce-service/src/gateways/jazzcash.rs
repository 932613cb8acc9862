//! JazzCash hosted checkout (page redirection) and transaction inquiry.
//!
//! Integrity hash contract: HMAC-SHA256 keyed with the integrity salt over
//! `salt & v1 & v2 & ...`, where `v*` are the non-empty values of every
//! `pp`-prefixed field except `pp_SecureHash`, ordered by field name.
//! The hash is sent and received as uppercase hex. The same routine signs
//! outbound forms and verifies return callbacks, IPN bodies and inquiry
//! responses.
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::body;
use super::{
    hmac_sha256_hex, read_json_response, transport_error, verify_hmac_sha256, CheckoutSession,
    GatewayAdapter, GatewayError, GatewayOutcome, GatewayStatus, SessionRequest, WebhookEvent,
};
use crate::config::JazzCashConfig;
use crate::domain::money;
use crate::domain::payment::GatewayKind;

pub const SECURE_HASH_FIELD: &str = "pp_SecureHash";
const API_VERSION: &str = "1.1";
const DATE_FORMAT: &str = "%Y%m%d%H%M%S";
const PKT_OFFSET_SECS: i32 = 5 * 3600;
const MAX_TXN_REF_LEN: usize = 20;

// Fields whose values never appear in logs
const REDACTED_FIELDS: [&str; 1] = ["pp_Password"];

pub struct JazzCashGateway {
    config: JazzCashConfig,
    currency: String,
    client: Client,
}

impl JazzCashGateway {
    pub fn new(config: JazzCashConfig, currency: String, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            currency,
            client,
        })
    }

    /// Canonical string that is hashed: the salt followed by the sorted
    /// non-empty `pp` values, joined with `&`.
    pub fn integrity_string(salt: &str, fields: &BTreeMap<String, String>) -> String {
        Self::signed_values(fields).fold(salt.to_string(), |mut acc, (_, value)| {
            acc.push('&');
            acc.push_str(value);
            acc
        })
    }

    // Same layout as integrity_string, safe for logs
    fn redacted_integrity_string(fields: &BTreeMap<String, String>) -> String {
        Self::signed_values(fields).fold("[SALT]".to_string(), |mut acc, (key, value)| {
            acc.push('&');
            if REDACTED_FIELDS.contains(&key.as_str()) {
                acc.push_str("[REDACTED]");
            } else {
                acc.push_str(value);
            }
            acc
        })
    }

    fn signed_values(fields: &BTreeMap<String, String>) -> impl Iterator<Item = (&String, &String)> {
        fields
            .iter()
            .filter(|(key, value)| key.starts_with("pp") && key.as_str() != SECURE_HASH_FIELD && !value.is_empty())
    }

    pub fn secure_hash(&self, fields: &BTreeMap<String, String>) -> String {
        tracing::debug!(
            "JazzCash integrity string: {}",
            Self::redacted_integrity_string(fields)
        );

        let message = Self::integrity_string(&self.config.integrity_salt, fields);
        hmac_sha256_hex(self.config.integrity_salt.as_bytes(), message.as_bytes()).to_uppercase()
    }

    fn pkt_offset() -> FixedOffset {
        FixedOffset::east_opt(PKT_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
    }

    // "T" + PKT timestamp + random digits, at most 20 characters
    fn generate_txn_ref(now: &DateTime<FixedOffset>) -> String {
        let suffix: u32 = rand::rng().random_range(0..100_000);
        let mut reference = format!("T{}{:05}", now.format(DATE_FORMAT), suffix);
        reference.truncate(MAX_TXN_REF_LEN);
        reference
    }

    fn session_fields(
        &self,
        request: &SessionRequest,
        txn_ref: &str,
        now: &DateTime<FixedOffset>,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let amount_minor = money::to_minor_units(&request.amount)
            .filter(|v| *v > 0)
            .ok_or_else(|| GatewayError::InvalidPayload(format!("invalid amount {}", request.amount)))?;

        let expiry = *now + chrono::Duration::hours(self.config.expiry_hours);
        let description: String = request.description.chars().take(100).collect();

        let mut fields = BTreeMap::new();
        fields.insert("pp_Version".to_string(), API_VERSION.to_string());
        fields.insert("pp_TxnType".to_string(), self.config.txn_type.clone());
        fields.insert("pp_Language".to_string(), "EN".to_string());
        fields.insert("pp_MerchantID".to_string(), self.config.merchant_id.clone());
        fields.insert("pp_SubMerchantID".to_string(), String::new());
        fields.insert("pp_Password".to_string(), self.config.password.clone());
        fields.insert("pp_BankID".to_string(), String::new());
        fields.insert("pp_ProductID".to_string(), String::new());
        fields.insert("pp_TxnRefNo".to_string(), txn_ref.to_string());
        fields.insert("pp_Amount".to_string(), amount_minor.to_string());
        fields.insert("pp_TxnCurrency".to_string(), self.currency.clone());
        fields.insert("pp_TxnDateTime".to_string(), now.format(DATE_FORMAT).to_string());
        fields.insert(
            "pp_BillReference".to_string(),
            format!("{}{}", request.item_type, request.item_id),
        );
        fields.insert("pp_Description".to_string(), description);
        fields.insert("pp_TxnExpiryDateTime".to_string(), expiry.format(DATE_FORMAT).to_string());
        fields.insert("pp_ReturnURL".to_string(), self.config.return_url.clone());

        // Merchant pass-through fields come back on the callback
        fields.insert("ppmpf_1".to_string(), request.buyer_id.to_string());
        fields.insert("ppmpf_2".to_string(), request.item_type.to_string());
        fields.insert("ppmpf_3".to_string(), request.item_id.to_string());
        fields.insert("ppmpf_4".to_string(), request.format.to_string());
        fields.insert("ppmpf_5".to_string(), request.seller_id.to_string());

        let hash = self.secure_hash(&fields);
        fields.insert(SECURE_HASH_FIELD.to_string(), hash);
        Ok(fields)
    }

    // 000 / 121 paid, 124 / 157 awaiting customer action, everything else failed
    pub fn map_response_code(code: &str) -> GatewayStatus {
        match code.trim() {
            "000" | "121" => GatewayStatus::Success,
            "124" | "157" => GatewayStatus::Pending,
            _ => GatewayStatus::Failed,
        }
    }

    fn parse_txn_datetime(raw: &str) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(raw.trim(), DATE_FORMAT).ok()?;
        Self::pkt_offset()
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn outcome_from_fields(fields: &BTreeMap<String, String>) -> Result<GatewayOutcome, GatewayError> {
        let transaction_ref = fields
            .get("pp_TxnRefNo")
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::InvalidPayload("pp_TxnRefNo missing".to_string()))?;

        let code = fields
            .get("pp_ResponseCode")
            .ok_or_else(|| GatewayError::InvalidPayload("pp_ResponseCode missing".to_string()))?;

        Ok(GatewayOutcome {
            transaction_ref,
            status: Self::map_response_code(code),
            amount_minor: fields.get("pp_Amount").and_then(|v| v.trim().parse().ok()),
            gateway_txn_id: fields
                .get("pp_RetreivalReferenceNo")
                .filter(|v| !v.is_empty())
                .cloned(),
            message: fields.get("pp_ResponseMessage").cloned(),
            raw: body::fields_to_json(fields),
        })
    }
}

#[async_trait]
impl GatewayAdapter for JazzCashGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::JazzCash
    }

    // Page redirection needs no API call: the signed form is posted by the browser
    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError> {
        let now = Utc::now().with_timezone(&Self::pkt_offset());
        let txn_ref = Self::generate_txn_ref(&now);
        let fields = self.session_fields(request, &txn_ref, &now)?;

        tracing::info!(
            "JazzCash session created: ref={} buyer={} item={}:{}",
            txn_ref,
            request.buyer_id,
            request.item_type,
            request.item_id
        );

        Ok(CheckoutSession {
            payment_url: self.config.checkout_url.clone(),
            session_token: txn_ref.clone(),
            transaction_ref: txn_ref,
            form_fields: fields,
        })
    }

    fn verify_callback(&self, fields: &BTreeMap<String, String>) -> bool {
        let Some(received) = fields.get(SECURE_HASH_FIELD) else {
            return false;
        };

        let message = Self::integrity_string(&self.config.integrity_salt, fields);
        verify_hmac_sha256(self.config.integrity_salt.as_bytes(), message.as_bytes(), received)
    }

    fn parse_callback(&self, fields: &BTreeMap<String, String>) -> Result<GatewayOutcome, GatewayError> {
        Self::outcome_from_fields(fields)
    }

    // IPN carries its hash inside the body
    fn signature_header(&self) -> Option<&'static str> {
        None
    }

    fn verify_webhook(&self, raw_body: &[u8], _signature: Option<&str>) -> bool {
        match body::parse_fields(raw_body) {
            Ok(fields) => self.verify_callback(&fields),
            Err(_) => false,
        }
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let fields = body::parse_fields(raw_body)?;
        let outcome = Self::outcome_from_fields(&fields)?;

        let mut metadata: BTreeMap<String, String> = fields
            .iter()
            .filter(|(key, value)| key.starts_with("ppmpf_") && !value.is_empty())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(txn_id) = &outcome.gateway_txn_id {
            metadata.insert("gateway_txn_id".to_string(), txn_id.clone());
        }

        Ok(WebhookEvent {
            tracker: outcome.transaction_ref,
            amount_minor: outcome.amount_minor,
            currency: fields.get("pp_TxnCurrency").cloned(),
            status: outcome.status,
            metadata,
            timestamp: fields
                .get("pp_TxnDateTime")
                .and_then(|raw| Self::parse_txn_datetime(raw)),
            raw: outcome.raw,
        })
    }

    fn webhook_ack(&self) -> Value {
        json!({
            "pp_ResponseCode": "000",
            "pp_ResponseMessage": "IPN received"
        })
    }

    async fn inquire(&self, transaction_ref: &str) -> Result<GatewayOutcome, GatewayError> {
        let mut fields = BTreeMap::new();
        fields.insert("pp_TxnRefNo".to_string(), transaction_ref.to_string());
        fields.insert("pp_MerchantID".to_string(), self.config.merchant_id.clone());
        fields.insert("pp_Password".to_string(), self.config.password.clone());
        fields.insert("pp_Version".to_string(), API_VERSION.to_string());
        let hash = self.secure_hash(&fields);
        fields.insert(SECURE_HASH_FIELD.to_string(), hash);

        let response = self
            .client
            .post(format!("{}/PaymentInquiry/Inquire", self.config.api_url.trim_end_matches('/')))
            .json(&fields)
            .send()
            .await
            .map_err(transport_error)?;

        let document = read_json_response(response).await?;
        let response_fields: BTreeMap<String, String> = document
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(k, v)| body::scalar_to_string(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default();

        if response_fields.contains_key(SECURE_HASH_FIELD) && !self.verify_callback(&response_fields) {
            tracing::warn!(target: "security", "JazzCash inquiry response failed hash check: ref={}", transaction_ref);
            return Err(GatewayError::InvalidPayload("inquiry response hash mismatch".to_string()));
        }

        let inquiry_code = response_fields.get("pp_ResponseCode").map(String::as_str).unwrap_or("");
        if inquiry_code != "000" {
            let message = response_fields
                .get("pp_ResponseMessage")
                .cloned()
                .unwrap_or_else(|| format!("inquiry failed with code {}", inquiry_code));
            return Err(GatewayError::Rejected(message));
        }

        let payment_code = response_fields
            .get("pp_PaymentResponseCode")
            .or_else(|| response_fields.get("pp_Status"))
            .map(String::as_str)
            .unwrap_or("");

        Ok(GatewayOutcome {
            transaction_ref: transaction_ref.to_string(),
            status: Self::map_response_code(payment_code),
            amount_minor: response_fields.get("pp_Amount").and_then(|v| v.trim().parse().ok()),
            gateway_txn_id: response_fields
                .get("pp_RetreivalReferenceNo")
                .filter(|v| !v.is_empty())
                .cloned(),
            message: response_fields.get("pp_PaymentResponseMessage").cloned(),
            raw: document,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> JazzCashConfig {
    JazzCashConfig {
        merchant_id: "MC12345".to_string(),
        password: "0abc1def2g".to_string(),
        integrity_salt: "s4ltv4lue9".to_string(),
        checkout_url: "https://sandbox.jazzcash.com.pk/CustomerPortal/transactionmanagement/merchantform/".to_string(),
        api_url: "http://127.0.0.1:9/ApplicationAPI/API".to_string(),
        return_url: "https://shop.example/api/payments/jazzcash/return".to_string(),
        txn_type: "MWALLET".to_string(),
        expiry_hours: 24,
    }
}

#[cfg(test)]
pub(crate) fn test_gateway() -> JazzCashGateway {
    JazzCashGateway::new(test_config(), "PKR".to_string(), Duration::from_secs(1)).unwrap()
}

// Signed callback fields as JazzCash posts them back
#[cfg(test)]
pub(crate) fn signed_callback(txn_ref: &str, amount_minor: i64, code: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("pp_Amount".to_string(), amount_minor.to_string());
    fields.insert("pp_MerchantID".to_string(), "MC12345".to_string());
    fields.insert("pp_ResponseCode".to_string(), code.to_string());
    fields.insert("pp_ResponseMessage".to_string(), "Transaction processed".to_string());
    fields.insert("pp_RetreivalReferenceNo".to_string(), "260101123456".to_string());
    fields.insert("pp_TxnCurrency".to_string(), "PKR".to_string());
    fields.insert("pp_TxnDateTime".to_string(), "20260101120000".to_string());
    fields.insert("pp_TxnRefNo".to_string(), txn_ref.to_string());
    let hash = test_gateway().secure_hash(&fields);
    fields.insert(SECURE_HASH_FIELD.to_string(), hash);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{ContentFormat, ItemType};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn golden_request_fields() -> BTreeMap<String, String> {
        [
            ("pp_Version", "1.1"),
            ("pp_TxnType", "MWALLET"),
            ("pp_Language", "EN"),
            ("pp_MerchantID", "MC12345"),
            ("pp_SubMerchantID", ""),
            ("pp_Password", "0abc1def2g"),
            ("pp_BankID", ""),
            ("pp_ProductID", ""),
            ("pp_TxnRefNo", "T2026010112000012345"),
            ("pp_Amount", "50000"),
            ("pp_TxnCurrency", "PKR"),
            ("pp_TxnDateTime", "20260101120000"),
            ("pp_BillReference", "book42"),
            ("pp_Description", "Book 42 (pdf)"),
            ("pp_TxnExpiryDateTime", "20260102120000"),
            ("pp_ReturnURL", "https://shop.example/api/payments/jazzcash/return"),
            ("ppmpf_1", "17"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn golden_callback_fields() -> BTreeMap<String, String> {
        [
            ("pp_Amount", "50000"),
            ("pp_AuthCode", ""),
            ("pp_MerchantID", "MC12345"),
            ("pp_ResponseCode", "000"),
            (
                "pp_ResponseMessage",
                "Thank you for Using JazzCash, your transaction was successful.",
            ),
            ("pp_RetreivalReferenceNo", "260101123456"),
            ("pp_TxnCurrency", "PKR"),
            ("pp_TxnDateTime", "20260101120000"),
            ("pp_TxnRefNo", "T2026010112000012345"),
            (
                "pp_SecureHash",
                "B8BD903A457B46071A6D97E50AE0CB4558D285436FE8683C6484C79E6480F737",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_integrity_string_order_and_empty_fields() {
        let expected = "s4ltv4lue9&50000&book42&Book 42 (pdf)&EN&MC12345&0abc1def2g\
            &https://shop.example/api/payments/jazzcash/return&PKR&20260101120000\
            &20260102120000&T2026010112000012345&MWALLET&1.1&17";
        assert_eq!(
            JazzCashGateway::integrity_string("s4ltv4lue9", &golden_request_fields()),
            expected
        );
    }

    #[test]
    fn test_secure_hash_golden_value() {
        let hash = test_gateway().secure_hash(&golden_request_fields());
        assert_eq!(
            hash,
            "EA4E83A113E94A353619BBBCCF987375543CC093BD5B28F44D41BCAC16AD8787"
        );
    }

    #[test]
    fn test_redacted_string_hides_password() {
        let redacted = JazzCashGateway::redacted_integrity_string(&golden_request_fields());
        assert!(!redacted.contains("0abc1def2g"));
        assert!(!redacted.contains("s4ltv4lue9"));
        assert!(redacted.starts_with("[SALT]&50000"));
    }

    #[test]
    fn test_verify_golden_callback() {
        let gateway = test_gateway();
        let fields = golden_callback_fields();
        assert!(gateway.verify_callback(&fields));

        let mut lowercase = fields.clone();
        let hash = lowercase["pp_SecureHash"].to_lowercase();
        lowercase.insert("pp_SecureHash".to_string(), hash);
        assert!(gateway.verify_callback(&lowercase));
    }

    #[test]
    fn test_missing_or_empty_hash_is_never_valid() {
        let gateway = test_gateway();
        let mut fields = golden_callback_fields();
        fields.insert("pp_SecureHash".to_string(), String::new());
        assert!(!gateway.verify_callback(&fields));

        fields.remove("pp_SecureHash");
        assert!(!gateway.verify_callback(&fields));
    }

    #[test]
    fn test_every_single_character_mutation_fails() {
        let gateway = test_gateway();
        let fields = golden_callback_fields();

        for (key, value) in fields.iter().filter(|(_, v)| !v.is_empty()) {
            for (index, original) in value.char_indices() {
                let replacement = if original == '0' { '1' } else { '0' };
                let mut mutated_value = value.clone();
                mutated_value.replace_range(index..index + original.len_utf8(), &replacement.to_string());

                let mut mutated = fields.clone();
                mutated.insert(key.clone(), mutated_value);
                assert!(
                    !gateway.verify_callback(&mutated),
                    "mutation of {} at {} still verified",
                    key,
                    index
                );
            }
        }
    }

    #[test]
    fn test_parse_callback_outcome() {
        let outcome = test_gateway().parse_callback(&golden_callback_fields()).unwrap();
        assert_eq!(outcome.transaction_ref, "T2026010112000012345");
        assert_eq!(outcome.status, GatewayStatus::Success);
        assert_eq!(outcome.amount_minor, Some(50_000));
        assert_eq!(outcome.gateway_txn_id.as_deref(), Some("260101123456"));
    }

    #[test]
    fn test_response_code_mapping() {
        assert_eq!(JazzCashGateway::map_response_code("000"), GatewayStatus::Success);
        assert_eq!(JazzCashGateway::map_response_code("124"), GatewayStatus::Pending);
        assert_eq!(JazzCashGateway::map_response_code("349"), GatewayStatus::Failed);
        assert_eq!(JazzCashGateway::map_response_code(""), GatewayStatus::Failed);
    }

    #[tokio::test]
    async fn test_create_session_signs_form() {
        let gateway = test_gateway();
        let request = SessionRequest {
            amount: BigDecimal::from_str("1.005").unwrap(),
            buyer_id: 17,
            item_id: 42,
            item_type: ItemType::Book,
            format: ContentFormat::Pdf,
            seller_id: 5,
            description: "Book 42 (pdf)".to_string(),
            metadata: BTreeMap::new(),
        };

        let session = gateway.create_session(&request).await.unwrap();
        assert!(session.transaction_ref.starts_with('T'));
        assert_eq!(session.transaction_ref.len(), 20);
        assert_eq!(session.form_fields["pp_Amount"], "101");
        assert_eq!(session.form_fields["pp_TxnRefNo"], session.transaction_ref);
        assert!(gateway.verify_callback(&session.form_fields));
    }

    #[test]
    fn test_ipn_json_and_form_bodies() {
        let gateway = test_gateway();
        let fields = golden_callback_fields();

        let json_body = serde_json::to_vec(&fields).unwrap();
        let form_body = serde_urlencoded::to_string(&fields).unwrap();

        for raw in [json_body, form_body.into_bytes()] {
            assert!(gateway.verify_webhook(&raw, None));
            let event = gateway.parse_webhook_event(&raw).unwrap();
            assert_eq!(event.tracker, "T2026010112000012345");
            assert_eq!(event.amount_minor, Some(50_000));
            assert_eq!(event.currency.as_deref(), Some("PKR"));
            assert_eq!(
                event.timestamp.map(|t| t.to_rfc3339()),
                Some("2026-01-01T07:00:00+00:00".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_inquiry_unreachable_is_unavailable() {
        let result = test_gateway().inquire("T2026010112000012345").await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }
}
