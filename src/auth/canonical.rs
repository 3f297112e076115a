//! Canonical message construction.
//!
//! The verifier rebuilds the signed message from the request it receives, so
//! the body bytes that are signed must be the body bytes that are sent.
//! [`SerializedBody`] is produced once and shared by both.

use serde::Serialize;

use crate::error::OperatorResult;

/// A JSON request body, serialized exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedBody(String);

impl SerializedBody {
    /// Compact JSON, fields in declaration order.
    pub fn from_value<T: Serialize + ?Sized>(body: &T) -> OperatorResult<Self> {
        Ok(Self(serde_json::to_string(body)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The exact UTF-8 text that gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage(String);

impl CanonicalMessage {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// `url:body:nonce` for requests with a body, `url:nonce` otherwise.
pub fn canonicalize(url: &str, body: Option<&str>, nonce: u64) -> CanonicalMessage {
    let nonce = nonce.to_string();
    let parts = match body {
        Some(body) => [url, body, nonce.as_str()].join(":"),
        None => [url, nonce.as_str()].join(":"),
    };
    CanonicalMessage(parts)
}
