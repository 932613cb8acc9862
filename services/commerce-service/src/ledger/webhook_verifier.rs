// Signature gate in front of every inbound gateway message. Nothing reaches
// the ledger unless the verdict is Accepted.
use serde_json::Value;
use std::collections::BTreeMap;

use crate::gateways::{GatewayAdapter, GatewayOutcome, WebhookEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookVerdict {
    Accepted(WebhookEvent),
    Rejected { reason: String },
}

// Transport-level reply: the gateway always gets its ack body with HTTP 200,
// whether or not the message was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookAck {
    pub body: Value,
    pub applied: bool,
}

pub struct WebhookVerifier;

impl WebhookVerifier {
    pub fn verify_webhook(adapter: &dyn GatewayAdapter, signature: Option<&str>, raw_body: &[u8]) -> WebhookVerdict {
        if !adapter.verify_webhook(raw_body, signature) {
            let reason = if signature.is_none() && adapter.signature_header().is_some() {
                "signature header missing"
            } else {
                "signature mismatch"
            };
            tracing::warn!(
                target: "security",
                "Rejected {} webhook: {} ({} bytes)",
                adapter.kind(),
                reason,
                raw_body.len()
            );
            return WebhookVerdict::Rejected {
                reason: reason.to_string(),
            };
        }

        match adapter.parse_webhook_event(raw_body) {
            Ok(event) => WebhookVerdict::Accepted(event),
            Err(e) => {
                tracing::warn!(target: "security", "Signed {} webhook could not be parsed: {}", adapter.kind(), e);
                WebhookVerdict::Rejected { reason: e.to_string() }
            }
        }
    }

    // Browser return: no ack convention, a bad signature is simply refused
    pub fn verify_return(adapter: &dyn GatewayAdapter, fields: &BTreeMap<String, String>) -> Option<GatewayOutcome> {
        if !adapter.verify_callback(fields) {
            tracing::warn!(
                target: "security",
                "Rejected {} return callback: integrity check failed ({} fields)",
                adapter.kind(),
                fields.len()
            );
            return None;
        }

        match adapter.parse_callback(fields) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(target: "security", "Signed {} return could not be parsed: {}", adapter.kind(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{jazzcash, safepay, GatewayStatus};

    #[test]
    fn test_tampered_jazzcash_ipn_is_rejected() {
        let gateway = jazzcash::test_gateway();
        let mut fields = jazzcash::signed_callback("T2026010112000012345", 50_000, "000");
        let body = serde_urlencoded::to_string(&fields).unwrap();
        assert!(matches!(
            WebhookVerifier::verify_webhook(&gateway, None, body.as_bytes()),
            WebhookVerdict::Accepted(_)
        ));

        fields.insert("pp_SecureHash".to_string(), "0".repeat(64));
        let tampered = serde_urlencoded::to_string(&fields).unwrap();
        assert!(matches!(
            WebhookVerifier::verify_webhook(&gateway, None, tampered.as_bytes()),
            WebhookVerdict::Rejected { .. }
        ));
    }

    #[test]
    fn test_safepay_webhook_without_header() {
        let gateway = safepay::test_gateway();
        let verdict = WebhookVerifier::verify_webhook(&gateway, None, br#"{"data":{"tracker":"t"}}"#);
        assert_eq!(
            verdict,
            WebhookVerdict::Rejected {
                reason: "signature header missing".to_string()
            }
        );
    }

    #[test]
    fn test_return_callback_outcome() {
        let gateway = jazzcash::test_gateway();
        let fields = jazzcash::signed_callback("T2026010112000012345", 50_000, "000");
        let outcome = WebhookVerifier::verify_return(&gateway, &fields).unwrap();
        assert_eq!(outcome.status, GatewayStatus::Success);

        let mut forged = fields.clone();
        forged.insert("pp_Amount".to_string(), "1".to_string());
        assert!(WebhookVerifier::verify_return(&gateway, &forged).is_none());
    }
}
