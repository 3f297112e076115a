//! Signed request authentication for privileged operator actions.
//!
//! Every privileged request (listing withdrawal requests, confirming,
//! rejecting) carries a credential header proving possession of the
//! operator's private key.
//!
//! ## Security Model
//!
//! - The operator's P-256 private key is loaded from a local key file and held
//!   only in memory, zeroized on drop
//! - One key is live at a time; any key failure empties the slot
//! - Each request is signed over `url:body:nonce` (or `url:nonce` when
//!   bodiless) with ECDSA/SHA-256, DER encoded
//! - The nonce is taken at signing time and never reused within a session
//!
//! ## Credential header
//!
//! ```text
//! Signature-Data: <base64 DER signature>:<nonce ms>:<base64 DER public key>
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let keys = auth::create_key_store();
//! keys.load(&pem_bytes, KeyFormat::Pem, &StaticPassphrase::new("secret")).await?;
//!
//! let (handle, public_key) = keys.export_for_signing().await?;
//! let signer = RequestSigner::new();
//! let signed = signer.sign_request(&url, None, &handle, &public_key)?;
//! ```

pub mod canonical;
pub mod keys;
pub mod keystore;
pub mod signer;

pub use canonical::{canonicalize, CanonicalMessage, SerializedBody};
pub use keys::{KeyContainer, KeyFormat, KeyMaterial, SigningHandle};
pub use keystore::{
    create_key_store, KeyEvent, KeyRejection, KeyStore, NoPassphrase, PassphraseProvider,
    SessionState, SharedKeyStore, StaticPassphrase,
};
pub use signer::{
    build_credential, verify_credential, Credential, NonceSource, RequestSigner, SignedRequest,
    SIGNATURE_HEADER,
};
