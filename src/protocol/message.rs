use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{RequestId, Result};

/// Closed classification of errors that cross the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The remote handler ran and failed.
    HandlerError,
    /// No handler is registered under the requested name.
    NoHandler,
    /// The request was rejected before the handler body ran
    /// (e.g. arguments did not decode).
    ValidationError,
}

impl ErrorKind {
    /// Wire representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandlerError => "handler_error",
            Self::NoHandler => "no_handler",
            Self::ValidationError => "validation_error",
        }
    }

    /// Parse a wire string; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "handler_error" => Some(Self::HandlerError),
            "no_handler" => Some(Self::NoHandler),
            "validation_error" => Some(Self::ValidationError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Peers may send kinds this crate does not know; keep the reply usable.
fn tolerant_kind<'de, D>(deserializer: D) -> std::result::Result<Option<ErrorKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(ErrorKind::parse))
}

/// The five message shapes exchanged between engines.
///
/// Requests (`Call`, `Notify`) travel on the request channel, replies
/// (`ResultOk`, `ResultError`, `Ack`) on the response channel. Every reply
/// carries the `request_id` of the request it answers.
///
/// Encoded as JSON, tagged by `type`:
///
/// ```json
/// {"type":"call","requestId":"…","name":"add","args":[3,7]}
/// {"type":"result-ok","requestId":"…","value":10}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Request expecting exactly one `ResultOk` or `ResultError`.
    #[serde(rename_all = "camelCase")]
    Call {
        request_id: RequestId,
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Request expecting exactly one `Ack`.
    #[serde(rename_all = "camelCase")]
    Notify {
        request_id: RequestId,
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Successful reply to a `Call`.
    #[serde(rename_all = "camelCase")]
    ResultOk {
        request_id: RequestId,
        #[serde(default)]
        value: Value,
    },

    /// Failed reply to a `Call`.
    #[serde(rename_all = "camelCase")]
    ResultError {
        request_id: RequestId,
        message: String,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "tolerant_kind"
        )]
        kind: Option<ErrorKind>,
    },

    /// Delivery acknowledgement for a `Notify`.
    #[serde(rename_all = "camelCase")]
    Ack { request_id: RequestId },
}

impl WireMessage {
    /// Correlation id carried by every variant.
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Call { request_id, .. }
            | Self::Notify { request_id, .. }
            | Self::ResultOk { request_id, .. }
            | Self::ResultError { request_id, .. }
            | Self::Ack { request_id } => request_id,
        }
    }

    /// `Call` or `Notify`.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Call { .. } | Self::Notify { .. })
    }

    /// `ResultOk`, `ResultError` or `Ack`.
    pub fn is_reply(&self) -> bool {
        !self.is_request()
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<Bytes> {
        let bytes = serde_json::to_vec(self)?;
        Ok(Bytes::from(bytes))
    }

    /// Parse the JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_wire_shape() {
        // ---
        let msg = WireMessage::Call {
            request_id: RequestId::from("r-1"),
            name: "add".into(),
            args: vec![json!(3), json!(7)],
        };

        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "call", "requestId": "r-1", "name": "add", "args": [3, 7]})
        );
    }

    #[test]
    fn test_result_error_without_kind_omits_field() {
        // ---
        let msg = WireMessage::ResultError {
            request_id: RequestId::from("r-2"),
            message: "boom".into(),
            kind: None,
        };

        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "result-error", "requestId": "r-2", "message": "boom"})
        );
    }

    #[test]
    fn test_unknown_kind_is_tolerated() {
        // ---
        let raw = br#"{"type":"result-error","requestId":"r-3","message":"nope","kind":"Denied"}"#;
        let msg = WireMessage::decode(raw).unwrap();

        assert_eq!(
            msg,
            WireMessage::ResultError {
                request_id: RequestId::from("r-3"),
                message: "nope".into(),
                kind: None,
            }
        );
    }

    #[test]
    fn test_missing_args_default_to_empty() {
        // ---
        let raw = br#"{"type":"notify","requestId":"r-4","name":"ping"}"#;
        let msg = WireMessage::decode(raw).unwrap();

        assert!(msg.is_request());
        assert_eq!(msg.request_id().as_str(), "r-4");
        match msg {
            WireMessage::Notify { args, .. } => assert!(args.is_empty()),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_ack_is_reply() {
        // ---
        let msg = WireMessage::decode(br#"{"type":"ack","requestId":"r-5"}"#).unwrap();
        assert!(msg.is_reply());
    }

    #[test]
    fn test_garbage_is_rejected() {
        // ---
        assert!(WireMessage::decode(b"{\"type\":\"shout\"}").is_err());
        assert!(WireMessage::decode(b"not json").is_err());
    }
}
