//! Request signing and the credential header.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use p256::ecdsa::signature::{DigestSigner, DigestVerifier};
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::auth::canonical::{canonicalize, CanonicalMessage, SerializedBody};
use crate::auth::keys::SigningHandle;
use crate::error::{OperatorError, OperatorResult};

/// Header carrying the credential on every privileged request.
pub const SIGNATURE_HEADER: &str = "Signature-Data";

/// Millisecond nonces, strictly increasing within one source.
///
/// Wall-clock time is used when it has moved past the last nonce, otherwise
/// the last nonce plus one.
#[derive(Debug, Default)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = now_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Decoded form of the credential header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// DER ECDSA signature
    pub signature: Vec<u8>,
    pub nonce: u64,
    /// DER SubjectPublicKeyInfo
    pub public_key: Vec<u8>,
}

impl Credential {
    pub fn new(signature: Vec<u8>, nonce: u64, public_key: Vec<u8>) -> Self {
        Self {
            signature,
            nonce,
            public_key,
        }
    }

    /// `base64(signature):nonce:base64(public_key)`
    pub fn header_value(&self) -> String {
        build_credential(&self.signature, self.nonce, &self.public_key)
    }

    /// Parse a header value produced by [`Credential::header_value`].
    pub fn parse(header: &str) -> OperatorResult<Self> {
        let mut parts = header.split(':');
        let (Some(signature), Some(nonce), Some(public_key), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(OperatorError::parse(
                "credential must have exactly three ':'-separated fields",
            ));
        };

        let signature = BASE64
            .decode(signature)
            .map_err(|e| OperatorError::parse(format!("signature is not base64: {}", e)))?;
        let nonce = nonce
            .parse::<u64>()
            .map_err(|e| OperatorError::parse(format!("nonce is not a number: {}", e)))?;
        let public_key = BASE64
            .decode(public_key)
            .map_err(|e| OperatorError::parse(format!("public key is not base64: {}", e)))?;

        Ok(Self::new(signature, nonce, public_key))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// Header value for a signature, nonce and DER public key. Field order is
/// part of the wire contract.
pub fn build_credential(signature: &[u8], nonce: u64, public_key: &[u8]) -> String {
    [
        BASE64.encode(signature),
        nonce.to_string(),
        BASE64.encode(public_key),
    ]
    .join(":")
}

/// A request ready for transport.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub url: String,
    pub body: Option<SerializedBody>,
    pub nonce: u64,
    pub credential: Credential,
}

impl SignedRequest {
    /// The message the credential signs, rebuilt from the request fields.
    pub fn canonical_message(&self) -> CanonicalMessage {
        canonicalize(
            &self.url,
            self.body.as_ref().map(SerializedBody::as_str),
            self.nonce,
        )
    }
}

/// Produces signed credentials, one fresh nonce per request.
#[derive(Debug, Default)]
pub struct RequestSigner {
    nonces: NonceSource,
}

impl RequestSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// ECDSA P-256 over SHA-256 of `message`, DER encoded.
    pub fn sign(message: &[u8], handle: &SigningHandle) -> OperatorResult<Vec<u8>> {
        let digest = Sha256::new_with_prefix(message);
        let signature: Signature = handle
            .signing_key()
            .try_sign_digest(digest)
            .map_err(|e| OperatorError::signing(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Sign `url` and `body` under a nonce taken now.
    pub fn sign_request(
        &self,
        url: &str,
        body: Option<SerializedBody>,
        handle: &SigningHandle,
        public_key: &[u8],
    ) -> OperatorResult<SignedRequest> {
        let nonce = self.nonces.next();
        let message = canonicalize(url, body.as_ref().map(SerializedBody::as_str), nonce);
        let signature = Self::sign(message.as_bytes(), handle)?;
        debug!(url, nonce, "Request signed");

        Ok(SignedRequest {
            url: url.to_string(),
            body,
            nonce,
            credential: Credential::new(signature, nonce, public_key.to_vec()),
        })
    }
}

/// Check a credential against the request it arrived with, the way the
/// operator API does.
pub fn verify_credential(
    url: &str,
    body: Option<&str>,
    credential: &Credential,
) -> OperatorResult<()> {
    let key = VerifyingKey::from_public_key_der(&credential.public_key)
        .map_err(|e| OperatorError::parse(format!("invalid public key: {}", e)))?;
    let signature = Signature::from_der(&credential.signature)
        .map_err(|_| OperatorError::SignatureVerificationFailed)?;
    let message = canonicalize(url, body, credential.nonce);
    key.verify_digest(Sha256::new_with_prefix(message.as_bytes()), &signature)
        .map_err(|_| OperatorError::SignatureVerificationFailed)
}
