use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier linking a `call`/`notify` to its reply.
///
/// Generated fresh for every outgoing request and never reused. It is the
/// only correlation key between a request and its reply, and the key used
/// to drop late or duplicated replies.
///
/// # Format
///
/// Standard UUID format: `550e8400-e29b-41d4-a9b6-446655440000`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new unique request ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_unique() {
        // ---
        let ids: HashSet<RequestId> = (0..1000).map(|_| RequestId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_format() {
        // ---
        let id = RequestId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 36); // Standard UUID format
    }

    #[test]
    fn test_serializes_as_plain_string() {
        // ---
        let id = RequestId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
