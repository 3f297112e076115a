//! Single-slot, in-memory store for the operator signing key.
//!
//! The slot starts empty. `import` parses a key file into it, `decrypt`
//! unlocks an encrypted container in place and `validate_is_private`
//! promotes the session to [`SessionState::Authenticated`]. Any failure on
//! the way empties the slot and broadcasts a [`KeyEvent::Rejected`] so the
//! presentation layer can drop whatever privileged data it shows.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::keys::{decrypt_container, KeyContainer, KeyFormat, KeyMaterial, SigningHandle};
use crate::error::{OperatorError, OperatorResult};

/// Operator session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No key loaded
    Unauthenticated,
    /// Key imported, not yet decrypted and validated
    KeyLoading,
    /// Key validated, privileged actions allowed
    Authenticated,
}

/// Why a key was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRejection {
    Unparseable,
    WrongPassphrase,
    NotAPrivateKey,
}

/// Notification emitted on every key transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Authenticated,
    /// Key failed import, decryption or validation. Privileged data must be cleared.
    Rejected(KeyRejection),
    /// Key dropped on request.
    Cleared,
}

/// Source of the passphrase for encrypted key files.
#[async_trait]
pub trait PassphraseProvider: Send + Sync {
    async fn passphrase(&self) -> OperatorResult<Zeroizing<String>>;
}

/// Fixed passphrase, e.g. read from a secret file.
pub struct StaticPassphrase(Zeroizing<String>);

impl StaticPassphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }
}

#[async_trait]
impl PassphraseProvider for StaticPassphrase {
    async fn passphrase(&self) -> OperatorResult<Zeroizing<String>> {
        Ok(self.0.clone())
    }
}

/// For unencrypted keys. An encrypted key fails with `WrongPassphrase`.
pub struct NoPassphrase;

#[async_trait]
impl PassphraseProvider for NoPassphrase {
    async fn passphrase(&self) -> OperatorResult<Zeroizing<String>> {
        Err(OperatorError::WrongPassphrase)
    }
}

struct Slot {
    material: Option<KeyMaterial>,
    state: SessionState,
    /// Bumped whenever the key is dropped or replaced
    generation: u64,
}

impl Slot {
    fn reset(&mut self) {
        self.material = None;
        self.state = SessionState::Unauthenticated;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// In-memory operator key store.
pub struct KeyStore {
    slot: RwLock<Slot>,
    events: broadcast::Sender<KeyEvent>,
}

impl KeyStore {
    /// Create a new empty key store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            slot: RwLock::new(Slot {
                material: None,
                state: SessionState::Unauthenticated,
                generation: 0,
            }),
            events,
        }
    }

    /// Subscribe to key transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<KeyEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.slot.read().await.state
    }

    /// Key generation. Changes on every import, rejection and clear, so
    /// data fetched under one generation belongs to that key only.
    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state().await == SessionState::Authenticated
    }

    /// Whether the imported key still needs `decrypt`.
    pub async fn needs_passphrase(&self) -> bool {
        self.slot
            .read()
            .await
            .material
            .as_ref()
            .is_some_and(KeyMaterial::needs_passphrase)
    }

    /// Parse a key file into the slot, replacing any previous key.
    pub async fn import(&self, raw: &[u8], format: KeyFormat) -> OperatorResult<()> {
        let mut slot = self.slot.write().await;
        slot.reset();
        slot.state = SessionState::KeyLoading;

        match KeyContainer::parse(raw, format) {
            Ok(container) => {
                debug!(?format, ?container, "Operator key imported");
                slot.material = Some(KeyMaterial::new(container));
                Ok(())
            }
            Err(e) => {
                slot.reset();
                drop(slot);
                self.reject(KeyRejection::Unparseable, &e);
                Err(e)
            }
        }
    }

    /// Unlock an encrypted key in place. No-op for unencrypted keys.
    pub async fn decrypt(&self, passphrase: Zeroizing<String>) -> OperatorResult<()> {
        let mut slot = self.slot.write().await;
        let der = match slot.material.as_ref() {
            None => return Err(OperatorError::NoKeyLoaded),
            Some(material) => match material.encrypted_der() {
                Some(der) => Zeroizing::new(der.to_vec()),
                None => return Ok(()),
            },
        };

        // PBES2 key derivation is deliberately slow
        let result = tokio::task::spawn_blocking(move || decrypt_container(&der, &passphrase))
            .await
            .map_err(|e| OperatorError::signing(format!("decrypt task failed: {}", e)))
            .and_then(|r| r);

        match (result, slot.material.as_mut()) {
            (Ok(secret), Some(material)) => {
                material.unlock(secret);
                Ok(())
            }
            (Ok(_), None) => Err(OperatorError::NoKeyLoaded),
            (Err(e), _) => {
                slot.reset();
                drop(slot);
                self.reject(KeyRejection::WrongPassphrase, &e);
                Err(e)
            }
        }
    }

    /// Require a key that can sign. Promotes the session to authenticated.
    pub async fn validate_is_private(&self) -> OperatorResult<()> {
        let mut slot = self.slot.write().await;
        let is_private = match slot.material.as_ref() {
            None => return Err(OperatorError::NoKeyLoaded),
            Some(material) => material.is_private(),
        };

        if !is_private {
            slot.reset();
            drop(slot);
            let e = OperatorError::NotAPrivateKey;
            self.reject(KeyRejection::NotAPrivateKey, &e);
            return Err(e);
        }

        slot.state = SessionState::Authenticated;
        drop(slot);
        info!("Private key imported successfully");
        let _ = self.events.send(KeyEvent::Authenticated);
        Ok(())
    }

    /// Import, decrypt if needed and validate in one go.
    pub async fn load(
        &self,
        raw: &[u8],
        format: KeyFormat,
        passphrase: &dyn PassphraseProvider,
    ) -> OperatorResult<()> {
        self.import(raw, format).await?;
        if self.needs_passphrase().await {
            let passphrase = match passphrase.passphrase().await {
                Ok(p) => p,
                Err(e) => {
                    self.slot.write().await.reset();
                    self.reject(KeyRejection::WrongPassphrase, &e);
                    return Err(e);
                }
            };
            self.decrypt(passphrase).await?;
        }
        self.validate_is_private().await
    }

    /// Signing handle and DER public key of the authenticated key.
    pub async fn export_for_signing(&self) -> OperatorResult<(SigningHandle, Vec<u8>)> {
        self.export_with_generation()
            .await
            .map(|(handle, public_key, _)| (handle, public_key))
    }

    /// Like [`KeyStore::export_for_signing`], plus the generation the key
    /// belongs to, read under the same lock.
    pub async fn export_with_generation(
        &self,
    ) -> OperatorResult<(SigningHandle, Vec<u8>, u64)> {
        let slot = self.slot.read().await;
        match (slot.state, slot.material.as_ref()) {
            (SessionState::Authenticated, Some(material)) => {
                let (handle, public_key) = material.export_for_signing()?;
                Ok((handle, public_key, slot.generation))
            }
            _ => Err(OperatorError::NoKeyLoaded),
        }
    }

    /// DER public key of the loaded key, if known.
    pub async fn public_key(&self) -> OperatorResult<Option<Vec<u8>>> {
        match self.slot.read().await.material.as_ref() {
            Some(material) => material.public_key_der(),
            None => Ok(None),
        }
    }

    /// Drop the key and return to unauthenticated.
    pub async fn clear(&self) {
        self.slot.write().await.reset();
        info!("Operator key cleared");
        let _ = self.events.send(KeyEvent::Cleared);
    }

    fn reject(&self, reason: KeyRejection, error: &OperatorError) {
        warn!(?reason, "Operator key rejected: {}", error);
        // No subscribers is fine
        let _ = self.events.send(KeyEvent::Rejected(reason));
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Shared key store handle for use across the application.
pub type SharedKeyStore = Arc<KeyStore>;

/// Create a new shared key store.
pub fn create_key_store() -> SharedKeyStore {
    Arc::new(KeyStore::new())
}
