pub mod body;
pub mod jazzcash;
pub mod safepay;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::payment::{ContentFormat, GatewayKind, ItemType, PaymentStatus};

type HmacSha256 = Hmac<Sha256>;

// Failures at the gateway boundary, before anything reaches the ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    // Timeout, connection failure or 5xx: outcome unknown, retry later
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    // Deterministic business decline (4xx, declined code)
    #[error("gateway rejected: {0}")]
    Rejected(String),

    #[error("invalid gateway payload: {0}")]
    InvalidPayload(String),
}

// Everything a gateway needs to open a hosted checkout
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub amount: BigDecimal,
    pub buyer_id: i32,
    pub item_id: i32,
    pub item_type: ItemType,
    pub format: ContentFormat,
    pub seller_id: i32,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

// Hosted checkout returned by create_session
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub payment_url: String,
    pub session_token: String,
    pub transaction_ref: String,
    pub form_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
    Refunded,
}

impl GatewayStatus {
    // Ledger status for a final gateway result, None while still pending
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        match self {
            GatewayStatus::Success => Some(PaymentStatus::Success),
            GatewayStatus::Failed => Some(PaymentStatus::Failed),
            GatewayStatus::Refunded => Some(PaymentStatus::Refunded),
            GatewayStatus::Pending => None,
        }
    }
}

// Normalised result of a callback, webhook or inquiry
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOutcome {
    pub transaction_ref: String,
    pub status: GatewayStatus,
    pub amount_minor: Option<i64>,
    pub gateway_txn_id: Option<String>,
    pub message: Option<String>,
    pub raw: Value,
}

// Normalised asynchronous notification
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub tracker: String,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub status: GatewayStatus,
    pub metadata: BTreeMap<String, String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub raw: Value,
}

impl WebhookEvent {
    pub fn into_outcome(self) -> GatewayOutcome {
        GatewayOutcome {
            transaction_ref: self.tracker,
            status: self.status,
            amount_minor: self.amount_minor,
            gateway_txn_id: self.metadata.get("gateway_txn_id").cloned(),
            message: None,
            raw: self.raw,
        }
    }
}

/// One implementation per payment provider.
///
/// Network calls (`create_session`, `inquire`) carry a bounded timeout and
/// report `GatewayError::Unavailable` when the outcome is unknown.
/// `verify_*` never panic and never accept a missing signature.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError>;

    // Browser return / redirect callback
    fn verify_callback(&self, fields: &BTreeMap<String, String>) -> bool;

    fn parse_callback(&self, fields: &BTreeMap<String, String>) -> Result<GatewayOutcome, GatewayError>;

    // Server-to-server notification
    fn signature_header(&self) -> Option<&'static str>;

    fn verify_webhook<'a>(&self, raw_body: &[u8], signature: Option<&'a str>) -> bool;

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, GatewayError>;

    // Body the provider expects back on every webhook delivery
    fn webhook_ack(&self) -> Value;

    // Transaction status inquiry used by reconciliation
    async fn inquire(&self, transaction_ref: &str) -> Result<GatewayOutcome, GatewayError>;
}

// Lookup table of configured adapters
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: GatewayKind) -> Option<Arc<dyn GatewayAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

fn mac_for(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size")
}

// Lowercase hex HMAC-SHA256
pub(crate) fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = mac_for(key);
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

// Constant-time check of a hex signature, case-insensitive
pub(crate) fn verify_hmac_sha256(key: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let signature_hex = signature_hex.trim();
    if signature_hex.is_empty() {
        return false;
    }

    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = mac_for(key);
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

// Transport failures never mean success or definite failure
pub(crate) fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Unavailable(format!("timeout: {}", err))
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

// Turn a provider HTTP response into JSON or a classified error
pub(crate) async fn read_json_response(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();

    if status.is_server_error() {
        return Err(GatewayError::Unavailable(format!("provider returned {}", status)));
    }

    if status.is_client_error() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(GatewayError::Rejected(format!("{}: {}", status, text)));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| GatewayError::InvalidPayload(format!("response is not JSON: {}", e)))
}
