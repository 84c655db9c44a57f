//! Feed Codec Module
//!
//! JSON encoding and decoding for the price feed's text frames.
//!
//! Every inbound frame must be a JSON object with a string `type` field.
//! Anything else is a [`CodecError`]: the caller drops the frame and
//! counts it, the connection carries on. Objects with an unrecognised
//! `type` decode successfully as [`InboundMessage::Unknown`] so newer
//! servers can add message kinds without breaking older clients.

use super::messages::{InboundMessage, OutboundMessage, PongFrame, PriceUpdateFrame};

/// Longest slice of a bad frame quoted in error messages.
const PREVIEW_LEN: usize = 64;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not a tagged object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// A known message kind had an unexpected body.
    #[error("malformed {kind} message: {source}")]
    MalformedBody {
        /// Message kind from the `type` field.
        kind: &'static str,
        /// Underlying deserialization error.
        source: serde_json::Error,
    },
}

/// JSON codec for the price feed.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON, is not an object with a
    /// string `type`, or is a known kind whose body does not match.
    pub fn decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let trimmed = text.trim();
        let value: serde_json::Value = serde_json::from_str(trimmed)?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(trimmed)
            )));
        };

        let Some(kind) = object.get("type").and_then(serde_json::Value::as_str) else {
            return Err(CodecError::InvalidFormat(format!(
                "missing string \"type\" field: {}",
                preview(trimmed)
            )));
        };

        match kind {
            "price_update" => {
                let frame: PriceUpdateFrame = serde_json::from_value(value).map_err(|source| {
                    CodecError::MalformedBody {
                        kind: "price_update",
                        source,
                    }
                })?;
                Ok(InboundMessage::PriceUpdate(frame.data))
            }
            "pong" => {
                let frame: PongFrame =
                    serde_json::from_value(value).map_err(|source| CodecError::MalformedBody {
                        kind: "pong",
                        source,
                    })?;
                Ok(InboundMessage::Pong(frame))
            }
            other => Ok(InboundMessage::Unknown {
                kind: other.to_string(),
                raw: trimmed.to_string(),
            }),
        }
    }

    /// Encode an outbound message to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &OutboundMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SymbolSet;
    use test_case::test_case;

    #[test]
    fn decode_price_update() {
        let codec = JsonCodec::new();
        let json = r#"{"type":"price_update","data":[
            {"symbol":"BTC","price":107000,"timestamp":1736935200000},
            {"symbol":"ETH","price":4000.5,"change24h":-2.1,"timestamp":1736935200001}
        ]}"#;

        let InboundMessage::PriceUpdate(entries) = codec.decode(json).unwrap() else {
            panic!("expected PriceUpdate");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].symbol, "BTC");
        assert!((entries[0].price - 107_000.0).abs() < f64::EPSILON);
        assert!(entries[0].change_24h.is_none());
        assert_eq!(entries[1].change_24h, Some(-2.1));
    }

    #[test]
    fn decode_empty_price_update() {
        let codec = JsonCodec::new();
        let msg = codec.decode(r#"{"type":"price_update","data":[]}"#).unwrap();
        assert_eq!(msg, InboundMessage::PriceUpdate(vec![]));
    }

    #[test]
    fn decode_pong() {
        let codec = JsonCodec::new();
        assert_eq!(
            codec.decode(r#"{"type":"pong"}"#).unwrap(),
            InboundMessage::Pong(PongFrame::default())
        );
    }

    #[test]
    fn decode_unknown_kind_is_tolerated() {
        let codec = JsonCodec::new();
        let raw = r#"{"type":"news","headline":"hello"}"#;

        match codec.decode(raw).unwrap() {
            InboundMessage::Unknown { kind, raw: text } => {
                assert_eq!(kind, "news");
                assert_eq!(text, raw);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case("42" ; "number")]
    #[test_case(r#"{"data":[]}"# ; "missing type")]
    #[test_case(r#"{"type":7}"# ; "non string type")]
    #[test_case(r#"{"type":"price_update"}"# ; "price update without data")]
    #[test_case(r#"{"type":"price_update","data":[{"price":1}]}"# ; "entry without symbol")]
    #[test_case(r#"{"type":"price_update","data":[{"symbol":"BTC","price":"high"}]}"# ; "non numeric price")]
    fn decode_rejects_malformed(frame: &str) {
        assert!(JsonCodec::new().decode(frame).is_err());
    }

    #[test]
    fn error_preview_is_bounded() {
        let long = format!("[{}]", "1,".repeat(200) + "1");
        let err = JsonCodec::new().decode(&long).unwrap_err();
        assert!(err.to_string().len() < 200);
    }

    #[test]
    fn encode_subscribe() {
        let codec = JsonCodec::new();
        let json = codec
            .encode(&OutboundMessage::subscribe(SymbolSet::parse_list("BTC,ETH")))
            .unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbols":["BTC","ETH"]}"#);
    }
}
