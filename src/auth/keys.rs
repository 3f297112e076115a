//! Operator key containers and the in-memory key material built from them.

use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use p256::{PublicKey, SecretKey};
use pkcs8::EncryptedPrivateKeyInfo;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{OperatorError, OperatorResult};

const PKCS8_LABEL: &str = "PRIVATE KEY";
const SEC1_LABEL: &str = "EC PRIVATE KEY";
const ENCRYPTED_PKCS8_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const SPKI_LABEL: &str = "PUBLIC KEY";

/// Encoding of a key file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    #[default]
    Pem,
    Der,
}

impl FromStr for KeyFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pem" => Ok(KeyFormat::Pem),
            "der" => Ok(KeyFormat::Der),
            other => Err(format!("unknown key format: {}", other)),
        }
    }
}

/// A parsed key file, before any validation.
pub enum KeyContainer {
    /// Unencrypted P-256 private key (PKCS#8 or SEC1).
    Private(SecretKey),
    /// PKCS#8 `EncryptedPrivateKeyInfo`, DER bytes. Needs a passphrase.
    Encrypted(Vec<u8>),
    /// Public key only, cannot sign.
    Public(PublicKey),
}

impl KeyContainer {
    /// Parse raw key file bytes.
    pub fn parse(raw: &[u8], format: KeyFormat) -> OperatorResult<Self> {
        match format {
            KeyFormat::Pem => {
                let (label, der) = pem_rfc7468::decode_vec(raw.trim_ascii())
                    .map_err(|e| OperatorError::parse(format!("invalid PEM: {}", e)))?;
                let der = Zeroizing::new(der);
                Self::from_labeled_der(label, &der)
            }
            KeyFormat::Der => Self::from_der(raw),
        }
    }

    fn from_labeled_der(label: &str, der: &[u8]) -> OperatorResult<Self> {
        match label {
            PKCS8_LABEL => SecretKey::from_pkcs8_der(der)
                .map(Self::Private)
                .map_err(|e| OperatorError::parse(format!("invalid PKCS#8 key: {}", e))),
            SEC1_LABEL => SecretKey::from_sec1_der(der)
                .map(Self::Private)
                .map_err(|e| OperatorError::parse(format!("invalid SEC1 key: {}", e))),
            ENCRYPTED_PKCS8_LABEL => {
                EncryptedPrivateKeyInfo::try_from(der).map_err(|e| {
                    OperatorError::parse(format!("invalid encrypted PKCS#8 key: {}", e))
                })?;
                Ok(Self::Encrypted(der.to_vec()))
            }
            SPKI_LABEL => PublicKey::from_public_key_der(der)
                .map(Self::Public)
                .map_err(|e| OperatorError::parse(format!("invalid public key: {}", e))),
            other => Err(OperatorError::parse(format!(
                "unsupported PEM label {:?}",
                other
            ))),
        }
    }

    /// DER carries no label, so each known structure is tried in turn.
    fn from_der(der: &[u8]) -> OperatorResult<Self> {
        if let Ok(secret) = SecretKey::from_pkcs8_der(der) {
            return Ok(Self::Private(secret));
        }
        if EncryptedPrivateKeyInfo::try_from(der).is_ok() {
            return Ok(Self::Encrypted(der.to_vec()));
        }
        if let Ok(secret) = SecretKey::from_sec1_der(der) {
            return Ok(Self::Private(secret));
        }
        if let Ok(public) = PublicKey::from_public_key_der(der) {
            return Ok(Self::Public(public));
        }
        Err(OperatorError::parse(
            "not a P-256 PKCS#8, SEC1 or SubjectPublicKeyInfo structure",
        ))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Private(_) => "private",
            Self::Encrypted(_) => "encrypted",
            Self::Public(_) => "public",
        }
    }
}

impl fmt::Debug for KeyContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyContainer").field(&self.kind()).finish()
    }
}

/// Decrypt a PKCS#8 `EncryptedPrivateKeyInfo`.
///
/// Any failure, whether in the cipher or in parsing the decrypted
/// structure, is reported as a wrong passphrase.
pub(crate) fn decrypt_container(der: &[u8], passphrase: &str) -> OperatorResult<SecretKey> {
    let info = EncryptedPrivateKeyInfo::try_from(der)
        .map_err(|e| OperatorError::parse(format!("invalid encrypted PKCS#8 key: {}", e)))?;
    let document = info
        .decrypt(passphrase.as_bytes())
        .map_err(|_| OperatorError::WrongPassphrase)?;
    SecretKey::from_pkcs8_der(document.as_bytes()).map_err(|_| OperatorError::WrongPassphrase)
}

/// Operator key material for the current session.
pub struct KeyMaterial {
    key: KeyContainer,
    encrypted: bool,
}

impl KeyMaterial {
    pub fn new(key: KeyContainer) -> Self {
        let encrypted = matches!(key, KeyContainer::Encrypted(_));
        Self { key, encrypted }
    }

    /// Whether the source container required a passphrase.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Still locked behind a passphrase.
    pub fn needs_passphrase(&self) -> bool {
        matches!(self.key, KeyContainer::Encrypted(_))
    }

    /// Usable for signing.
    pub fn is_private(&self) -> bool {
        matches!(self.key, KeyContainer::Private(_))
    }

    pub(crate) fn encrypted_der(&self) -> Option<&[u8]> {
        match &self.key {
            KeyContainer::Encrypted(der) => Some(der),
            _ => None,
        }
    }

    /// Replace the locked container with its decrypted key.
    pub(crate) fn unlock(&mut self, secret: SecretKey) {
        debug!("Operator key decrypted");
        self.key = KeyContainer::Private(secret);
    }

    /// DER SubjectPublicKeyInfo of the key, if it is known yet.
    pub fn public_key_der(&self) -> OperatorResult<Option<Vec<u8>>> {
        let public = match &self.key {
            KeyContainer::Private(secret) => secret.public_key(),
            KeyContainer::Public(public) => *public,
            KeyContainer::Encrypted(_) => return Ok(None),
        };
        encode_public_key(&public).map(Some)
    }

    /// Signing capability plus the public key transmitted with each request.
    pub fn export_for_signing(&self) -> OperatorResult<(SigningHandle, Vec<u8>)> {
        match &self.key {
            KeyContainer::Private(secret) => {
                let public_key = encode_public_key(&secret.public_key())?;
                Ok((SigningHandle::new(SigningKey::from(secret)), public_key))
            }
            KeyContainer::Public(_) => Err(OperatorError::NotAPrivateKey),
            KeyContainer::Encrypted(_) => Err(OperatorError::NoKeyLoaded),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kind", &self.key.kind())
            .field("encrypted", &self.encrypted)
            .finish()
    }
}

fn encode_public_key(public: &PublicKey) -> OperatorResult<Vec<u8>> {
    public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| OperatorError::signing(format!("public key encoding failed: {}", e)))
}

/// Opaque signing capability. Never serialized.
#[derive(Clone)]
pub struct SigningHandle {
    key: SigningKey,
}

impl SigningHandle {
    pub(crate) fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }
}

impl fmt::Debug for SigningHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningHandle").finish_non_exhaustive()
    }
}
