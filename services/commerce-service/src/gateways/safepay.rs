// Safepay hosted checkout: order init over the API, browser redirect back
// with a tracker signature, webhooks signed over the raw body.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::body;
use super::{
    read_json_response, transport_error, verify_hmac_sha256, CheckoutSession,
    GatewayAdapter, GatewayError, GatewayOutcome, GatewayStatus, SessionRequest, WebhookEvent,
};
use crate::config::SafepayConfig;
use crate::domain::money;
use crate::domain::payment::GatewayKind;

pub const SIGNATURE_HEADER: &str = "X-SFPY-SIGNATURE";
const MERCHANT_SECRET_HEADER: &str = "X-SFPY-MERCHANT-SECRET";

const TRACKER_PATHS: [&str; 3] = ["data.tracker", "data.notification.tracker", "tracker"];
const STATE_PATHS: [&str; 4] = ["data.state", "data.notification.state", "state", "data.tracker_state"];
const AMOUNT_PATHS: [&str; 3] = ["data.amount", "data.notification.amount", "amount"];
const CURRENCY_PATHS: [&str; 3] = ["data.currency", "data.notification.currency", "currency"];
const TIMESTAMP_PATHS: [&str; 3] = ["data.created_at", "created_at", "timestamp"];
const REFERENCE_PATHS: [&str; 3] = ["data.reference", "data.notification.reference", "reference"];

pub struct SafepayGateway {
    config: SafepayConfig,
    currency: String,
    client: Client,
}

impl SafepayGateway {
    pub fn new(config: SafepayConfig, currency: String, timeout: Duration) -> Result<Self, GatewayError> {
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

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    // Hosted page URL the buyer is redirected to
    pub fn checkout_url(&self, tracker: &str, order_id: &str) -> Result<String, GatewayError> {
        let url = Url::parse_with_params(
            &self.config.checkout_url,
            &[
                ("env", self.config.environment.as_str()),
                ("beacon", tracker),
                ("source", "custom"),
                ("order_id", order_id),
                ("redirect_url", self.config.return_url.as_str()),
                ("cancel_url", self.config.cancel_url.as_str()),
            ],
        )
        .map_err(|e| GatewayError::InvalidPayload(format!("invalid checkout url: {}", e)))?;

        Ok(url.to_string())
    }

    pub fn map_state(state: &str) -> GatewayStatus {
        match state.trim().to_ascii_uppercase().as_str() {
            "PAID" | "TRACKER_ENDED" | "COMPLETED" | "CAPTURED" => GatewayStatus::Success,
            "TRACKER_STARTED" | "CREATED" | "PENDING" | "AUTHORIZED" => GatewayStatus::Pending,
            "REFUNDED" | "PARTIALLY_REFUNDED" => GatewayStatus::Refunded,
            _ => GatewayStatus::Failed,
        }
    }

    fn amount_minor(doc: &Value) -> Option<i64> {
        body::lookup_string(doc, &AMOUNT_PATHS).and_then(|v| v.trim().parse().ok())
    }

    // Form bodies carry metadata as metadata[key]=value, JSON bodies as an object
    fn metadata(doc: &Value) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();

        if let Some(Value::Object(object)) = body::lookup(doc, &["data.metadata", "metadata"]) {
            for (key, value) in object {
                if let Some(value) = body::scalar_to_string(value) {
                    metadata.insert(key.clone(), value);
                }
            }
        }

        if let Value::Object(object) = doc {
            for (key, value) in object {
                let nested = key
                    .strip_prefix("metadata[")
                    .and_then(|rest| rest.strip_suffix(']'));
                if let (Some(name), Some(value)) = (nested, body::scalar_to_string(value)) {
                    metadata.insert(name.to_string(), value);
                }
            }
        }

        if let Some(reference) = body::lookup_string(doc, &REFERENCE_PATHS) {
            metadata.insert("gateway_txn_id".to_string(), reference);
        }

        metadata
    }
}

#[async_trait]
impl GatewayAdapter for SafepayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Safepay
    }

    async fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, GatewayError> {
        let amount_minor = money::to_minor_units(&request.amount)
            .filter(|v| *v > 0)
            .ok_or_else(|| GatewayError::InvalidPayload(format!("invalid amount {}", request.amount)))?;

        let payload = json!({
            "client": self.config.api_key,
            "amount": amount_minor,
            "currency": self.currency,
            "environment": self.config.environment,
            "metadata": request.metadata,
        });

        tracing::debug!(
            "Safepay order init: buyer={} item={}:{} amount_minor={}",
            request.buyer_id,
            request.item_type,
            request.item_id,
            amount_minor
        );

        let response = self
            .client
            .post(self.api_url("/order/v1/init"))
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let document = read_json_response(response).await?;
        let tracker = body::lookup_string(&document, &["data.token", "data.tracker", "token"])
            .ok_or_else(|| GatewayError::InvalidPayload("order init response has no tracker".to_string()))?;

        let order_id = format!("{}{}-{}", request.item_type, request.item_id, request.buyer_id);
        let payment_url = self.checkout_url(&tracker, &order_id)?;

        tracing::info!(
            "Safepay session created: tracker={} buyer={} item={}:{}",
            tracker,
            request.buyer_id,
            request.item_type,
            request.item_id
        );

        Ok(CheckoutSession {
            payment_url,
            session_token: tracker.clone(),
            transaction_ref: tracker,
            form_fields: BTreeMap::new(),
        })
    }

    fn verify_callback(&self, fields: &BTreeMap<String, String>) -> bool {
        let (Some(tracker), Some(signature)) = (fields.get("tracker"), fields.get("sig")) else {
            return false;
        };
        if tracker.is_empty() {
            return false;
        }

        verify_hmac_sha256(self.config.secret_key.as_bytes(), tracker.as_bytes(), signature)
    }

    // A signed redirect only happens after Safepay captured the payment
    fn parse_callback(&self, fields: &BTreeMap<String, String>) -> Result<GatewayOutcome, GatewayError> {
        let tracker = fields
            .get("tracker")
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::InvalidPayload("tracker missing".to_string()))?;

        Ok(GatewayOutcome {
            transaction_ref: tracker,
            status: GatewayStatus::Success,
            amount_minor: None,
            gateway_txn_id: fields.get("reference").filter(|v| !v.is_empty()).cloned(),
            message: None,
            raw: body::fields_to_json(fields),
        })
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some(SIGNATURE_HEADER)
    }

    fn verify_webhook(&self, raw_body: &[u8], signature: Option<&str>) -> bool {
        match signature {
            Some(signature) => verify_hmac_sha256(self.config.webhook_secret.as_bytes(), raw_body, signature),
            None => false,
        }
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let doc = body::parse_document(raw_body)?;

        let tracker = body::lookup_string(&doc, &TRACKER_PATHS)
            .ok_or_else(|| GatewayError::InvalidPayload("webhook has no tracker".to_string()))?;
        let state = body::lookup_string(&doc, &STATE_PATHS)
            .ok_or_else(|| GatewayError::InvalidPayload("webhook has no state".to_string()))?;

        let timestamp = body::lookup_string(&doc, &TIMESTAMP_PATHS)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(WebhookEvent {
            tracker,
            amount_minor: Self::amount_minor(&doc),
            currency: body::lookup_string(&doc, &CURRENCY_PATHS),
            status: Self::map_state(&state),
            metadata: Self::metadata(&doc),
            timestamp,
            raw: doc,
        })
    }

    fn webhook_ack(&self) -> Value {
        json!({ "received": true })
    }

    async fn inquire(&self, transaction_ref: &str) -> Result<GatewayOutcome, GatewayError> {
        let response = self
            .client
            .get(self.api_url(&format!("/order/v1/{}", transaction_ref)))
            .header(MERCHANT_SECRET_HEADER, &self.config.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        let document = read_json_response(response).await?;
        let state = body::lookup_string(&document, &STATE_PATHS)
            .ok_or_else(|| GatewayError::InvalidPayload("tracker status has no state".to_string()))?;

        Ok(GatewayOutcome {
            transaction_ref: transaction_ref.to_string(),
            status: Self::map_state(&state),
            amount_minor: Self::amount_minor(&document),
            gateway_txn_id: body::lookup_string(&document, &REFERENCE_PATHS),
            message: Some(state),
            raw: document,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> SafepayConfig {
    SafepayConfig {
        api_key: "sec_test_key".to_string(),
        secret_key: "sfpy_secret_key".to_string(),
        webhook_secret: "whsec_test_secret".to_string(),
        api_url: "http://127.0.0.1:9".to_string(),
        checkout_url: "https://sandbox.api.getsafepay.com/components".to_string(),
        environment: "sandbox".to_string(),
        return_url: "https://shop.example/api/payments/safepay/return".to_string(),
        cancel_url: "https://shop.example/checkout/cancelled".to_string(),
    }
}

#[cfg(test)]
pub(crate) fn test_gateway() -> SafepayGateway {
    SafepayGateway::new(test_config(), "PKR".to_string(), Duration::from_secs(1)).unwrap()
}
