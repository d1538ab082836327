// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Codec
//!
//! Turns an [`Order`] into a JSON payload tagged with its content type and
//! back. The content type travels in the AMQP properties so a consumer can
//! pick the matching decoder; a missing content type is treated as JSON.

use crate::{errors::CodecError, order::Order};
use serde_json::Error as JsonError;

/// Content type written on every published order
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A serialized order ready to be handed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOrder {
    pub content_type: &'static str,
    pub payload: Vec<u8>,
}

pub fn encode(order: &Order) -> Result<EncodedOrder, CodecError> {
    let payload = serde_json::to_vec(order).map_err(malformed)?;

    Ok(EncodedOrder {
        content_type: JSON_CONTENT_TYPE,
        payload,
    })
}

/// Decodes a payload published with `content_type`.
pub fn decode(content_type: Option<&str>, payload: &[u8]) -> Result<Order, CodecError> {
    match content_type {
        None => serde_json::from_slice(payload).map_err(malformed),
        Some(ct) if is_json(ct) => serde_json::from_slice(payload).map_err(malformed),
        Some(ct) => Err(CodecError::UnsupportedContentType(ct.to_owned())),
    }
}

// accepts parameters such as `application/json; charset=utf-8`
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
        .unwrap_or_default()
}

fn malformed(err: JsonError) -> CodecError {
    CodecError::Malformed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_encode_with_json_content_type() {
        let encoded = encode(&Order::new("123", "Laptop", 1)).unwrap();

        assert_eq!(encoded.content_type, "application/json");
        assert_eq!(
            encoded.payload,
            br#"{"id":"123","productName":"Laptop","quantity":1}"#.to_vec()
        );
    }

    #[test]
    fn should_decode_what_was_encoded() {
        let order = Order::new("456", "Phone", 0);
        let encoded = encode(&order).unwrap();

        let decoded = decode(Some(encoded.content_type), &encoded.payload).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn should_accept_content_type_parameters_and_missing_content_type() {
        let payload = br#"{"id":"1","productName":"Mouse","quantity":2}"#;

        assert!(decode(Some("application/json; charset=utf-8"), payload).is_ok());
        assert!(decode(None, payload).is_ok());
    }

    #[test]
    fn should_reject_unsupported_content_types() {
        let err = decode(Some("text/plain"), b"hello").unwrap_err();
        assert_eq!(err, CodecError::UnsupportedContentType("text/plain".to_owned()));
    }

    #[test]
    fn should_reject_malformed_payloads() {
        assert!(matches!(
            decode(Some(JSON_CONTENT_TYPE), b"not an order"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode(Some(JSON_CONTENT_TYPE), br#"{"id":"1","quantity":"lots"}"#),
            Err(CodecError::Malformed(_))
        ));
    }
}
