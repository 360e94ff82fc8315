//! Envelope and provenance protocol
//!
//! Brokers with native headers (AMQP) carry the message id and trace id as
//! ordinary headers. Header-less pub/sub brokers (NSQ, Redis) carry the body as
//! a JSON array `[payload, headers]`. On receive both ids are extracted from the
//! header map, or synthesized when the producer never wrote them.

use crate::common::headers::{HeaderValue, Headers};
use crate::common::package::OutboundPackage;
use thiserror::Error;
use uuid::Uuid;

/// Header carrying the message id
pub const HEADER_MESSAGE_ID: &str = "x-message-id";

/// Header carrying the trace id
pub const HEADER_TRACE_ID: &str = "x-trace-id";

/// AMQP delivery mode header
pub const HEADER_DELIVERY_MODE: &str = "delivery-mode";

/// AMQP per-message TTL header
pub const HEADER_EXPIRATION: &str = "expiration";

/// Errors produced while building a wire envelope
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// JSON envelopes carry the payload as a string
    #[error("payload is not valid UTF-8: {0}")]
    NonUtf8Payload(#[from] std::string::FromUtf8Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message identity recovered from a header map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub message_id: String,
    pub trace_id: String,
}

impl Provenance {
    /// Extract (or synthesize) both ids, removing the extracted keys from `headers`
    pub fn extract(headers: &mut Headers) -> Self {
        Self {
            message_id: extract_or_generate(HEADER_MESSAGE_ID, headers),
            trace_id: extract_or_generate(HEADER_TRACE_ID, headers),
        }
    }
}

/// Generate a fresh UUID string
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Return `headers[key]` when it is a non-empty string and remove it;
/// otherwise return a new UUID and leave the map untouched.
pub fn extract_or_generate(key: &str, headers: &mut Headers) -> String {
    let present = matches!(headers.get(key), Some(HeaderValue::String(value)) if !value.is_empty());

    if present {
        if let Some(HeaderValue::String(value)) = headers.remove(key) {
            return value;
        }
    }

    generate_id()
}

/// Body and headers decoded from a JSON envelope
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEnvelope {
    pub payload: Vec<u8>,
    pub headers: Headers,
}

/// Encode `[payload, headers]` as the JSON wire body
pub fn encode_json_envelope(payload: &[u8], headers: &Headers) -> Result<String, EnvelopeError> {
    let payload = String::from_utf8(payload.to_vec())?;
    Ok(serde_json::to_string(&(payload, headers))?)
}

/// Decode a JSON wire body.
///
/// A two-element array whose second element is an object (or null) yields the
/// payload and header map. Any other shape, including bodies that are not JSON,
/// is passed through as an opaque payload with no headers.
pub fn decode_json_envelope(raw: &str) -> DecodedEnvelope {
    if let Ok(serde_json::Value::Array(mut parts)) = serde_json::from_str::<serde_json::Value>(raw) {
        if parts.len() == 2 {
            let headers_part = parts.pop().unwrap_or_default();
            let payload_part = parts.pop().unwrap_or_default();

            let headers = match headers_part {
                serde_json::Value::Object(map) => Some(
                    map.into_iter()
                        .map(|(key, value)| (key, HeaderValue::from_json(value)))
                        .collect::<Headers>(),
                ),
                serde_json::Value::Null => Some(Headers::new()),
                _ => None,
            };

            if let Some(headers) = headers {
                let payload = match payload_part {
                    serde_json::Value::String(text) => text.into_bytes(),
                    other => other.to_string().into_bytes(),
                };

                return DecodedEnvelope { payload, headers };
            }
        }
    }

    DecodedEnvelope {
        payload: raw.as_bytes().to_vec(),
        headers: Headers::new(),
    }
}

/// Wire body of a package for header-less brokers: `[payload, headers + trace id]`
pub fn encode_package(package: &OutboundPackage) -> Result<String, EnvelopeError> {
    let mut headers = package.headers().clone();
    headers.insert(
        HEADER_TRACE_ID.to_string(),
        HeaderValue::String(package.trace_id().to_string()),
    );

    encode_json_envelope(package.payload(), &headers)
}

/// Decode a wire body and recover the message provenance
pub fn decode_package(raw: &str) -> (Provenance, DecodedEnvelope) {
    let mut envelope = decode_json_envelope(raw);
    let provenance = Provenance::extract(&mut envelope.headers);
    (provenance, envelope)
}

/// Decode a raw wire body; bytes that are not UTF-8 cannot be a JSON envelope
/// and are passed through untouched with fresh ids.
pub fn decode_package_bytes(body: &[u8]) -> (Provenance, DecodedEnvelope) {
    match std::str::from_utf8(body) {
        Ok(raw) => decode_package(raw),
        Err(_) => {
            let mut envelope = DecodedEnvelope {
                payload: body.to_vec(),
                headers: Headers::new(),
            };
            let provenance = Provenance::extract(&mut envelope.headers);
            (provenance, envelope)
        }
    }
}
