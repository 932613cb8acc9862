// Webhook / callback body parsing. Providers send either JSON or
// application/x-www-form-urlencoded; the format is detected from the bytes.
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Form,
}

pub fn detect_format(raw: &[u8]) -> BodyFormat {
    match raw.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => BodyFormat::Json,
        _ => BodyFormat::Form,
    }
}

/// Flat string fields of a body.
///
/// For JSON only top-level scalars are kept; nested objects are skipped.
pub fn parse_fields(raw: &[u8]) -> Result<BTreeMap<String, String>, GatewayError> {
    match detect_format(raw) {
        BodyFormat::Json => {
            let value: Value = serde_json::from_slice(raw)
                .map_err(|e| GatewayError::InvalidPayload(format!("malformed JSON body: {}", e)))?;
            let object = value
                .as_object()
                .ok_or_else(|| GatewayError::InvalidPayload("JSON body is not an object".to_string()))?;

            Ok(object
                .iter()
                .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key.clone(), v)))
                .collect())
        }
        BodyFormat::Form => {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(raw)
                .map_err(|e| GatewayError::InvalidPayload(format!("malformed form body: {}", e)))?;
            Ok(pairs.into_iter().collect())
        }
    }
}

// Whole body as a JSON document; form bodies become a flat object
pub fn parse_document(raw: &[u8]) -> Result<Value, GatewayError> {
    match detect_format(raw) {
        BodyFormat::Json => serde_json::from_slice(raw)
            .map_err(|e| GatewayError::InvalidPayload(format!("malformed JSON body: {}", e))),
        BodyFormat::Form => parse_fields(raw).map(|fields| fields_to_json(&fields)),
    }
}

pub fn fields_to_json(fields: &BTreeMap<String, String>) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

// First value found among dotted paths ("data.notification.tracker")
pub fn lookup<'a>(doc: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        let pointer = format!("/{}", path.replace('.', "/"));
        doc.pointer(&pointer).filter(|v| !v.is_null())
    })
}

pub fn lookup_string(doc: &Value, paths: &[&str]) -> Option<String> {
    lookup(doc, paths).and_then(scalar_to_string).filter(|s| !s.is_empty())
}

pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
