use thiserror::Error;

use crate::protocol::ErrorKind;

/// Error carried back from a remote peer in a `result-error` reply.
///
/// Only a flat message and an optional classification cross the wire; the
/// remote error type and any backtrace are lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Human-readable message produced by the remote side.
    pub message: String,

    /// Optional classification; `None` when the peer sent none or sent one
    /// this crate does not recognise.
    pub kind: Option<ErrorKind>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{} ({kind})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// A server-role engine was asked to send without a target.
    #[error("rpc '{name}' requires a target in the server role")]
    MissingTarget { name: String },

    /// The supplied target is not addressable.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// `call` cannot be broadcast; it expects exactly one reply.
    #[error("rpc '{name}': broadcast is not supported for call, use notify")]
    BroadcastCallNotSupported { name: String },

    /// The RPC name was empty.
    #[error("rpc name must not be empty")]
    InvalidName,

    /// No reply arrived before the deadline.
    #[error("rpc '{name}' timed out (request id {request_id})")]
    Timeout { name: String, request_id: String },

    /// The remote handler failed, or no handler was registered remotely.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// Raised by an application handler; flattened to message/kind on the wire.
    #[error("{message}")]
    Handler {
        message: String,
        kind: Option<ErrorKind>,
    },

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying event transport failed to emit or subscribe.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine was shut down while the request was outstanding.
    #[error("rpc engine closed")]
    Closed,

    /// A required builder field was not set.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A builder option has an unusable value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Builder options contradict each other.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),
}

impl RpcError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        // ---
        Self::Handler {
            message: message.into(),
            kind: Some(ErrorKind::HandlerError),
        }
    }

    /// Handler failure with an explicit classification.
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        // ---
        Self::Handler {
            message: message.into(),
            kind: Some(kind),
        }
    }

    /// True for the locally synthesized deadline error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for errors raised before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingTarget { .. }
                | Self::InvalidTarget(_)
                | Self::BroadcastCallNotSupported { .. }
                | Self::InvalidName
        )
    }

    /// True when the error was reported by the remote peer.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// The remote error, if this is one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    /// Flatten into the `{message, kind}` pair that goes on the wire.
    ///
    /// Argument decoding failures are classified as validation errors,
    /// everything else defaults to a handler error.
    pub(crate) fn into_wire_parts(self) -> (String, ErrorKind) {
        // ---
        match self {
            Self::Handler { message, kind } => {
                (message, kind.unwrap_or(ErrorKind::HandlerError))
            }
            Self::Serialization(e) => {
                (format!("invalid arguments: {e}"), ErrorKind::ValidationError)
            }
            Self::Remote(remote) => (
                remote.message,
                remote.kind.unwrap_or(ErrorKind::HandlerError),
            ),
            err if err.is_validation() => (err.to_string(), ErrorKind::ValidationError),
            other => (other.to_string(), ErrorKind::HandlerError),
        }
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_taxonomy_predicates() {
        // ---
        let err = RpcError::BroadcastCallNotSupported { name: "kick".into() };
        assert!(err.is_validation());
        assert!(!err.is_timeout());

        let err = RpcError::Timeout {
            name: "kick".into(),
            request_id: "abc".into(),
        };
        assert!(err.is_timeout());
        assert!(!err.is_validation());

        let err = RpcError::Remote(RemoteError {
            message: "boom".into(),
            kind: None,
        });
        assert!(err.is_remote());
        assert_eq!(err.as_remote().map(|r| r.message.as_str()), Some("boom"));
    }

    #[test]
    fn test_wire_parts() {
        // ---
        let (message, kind) = RpcError::handler("not enough money").into_wire_parts();
        assert_eq!(message, "not enough money");
        assert_eq!(kind, ErrorKind::HandlerError);

        let decode_err = serde_json::from_str::<(i64, i64)>("[3, \"x\"]").unwrap_err();
        let (message, kind) = RpcError::from(decode_err).into_wire_parts();
        assert!(message.starts_with("invalid arguments"));
        assert_eq!(kind, ErrorKind::ValidationError);

        let (_, kind) = RpcError::InvalidName.into_wire_parts();
        assert_eq!(kind, ErrorKind::ValidationError);
    }

    #[test]
    fn test_remote_display() {
        // ---
        let remote = RemoteError {
            message: "no handler registered for 'spawn'".into(),
            kind: Some(ErrorKind::NoHandler),
        };
        assert_eq!(
            remote.to_string(),
            "no handler registered for 'spawn' (no_handler)"
        );
    }
}
