//! Operator actions over signed requests.
//!
//! Each action exports the current signing key, signs its own request under
//! a fresh nonce and sends it. Actions may run concurrently; they share
//! nothing but the key store.

use custody_operator_types::{
    ConfirmationData, HotBalanceResponse, InviteRequest, InviteResp, RequestId, WithdrawalRequest,
    WithdrawalRequestInfo,
};
use reqwest::Method;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::{
    KeyFormat, PassphraseProvider, RequestSigner, SerializedBody, SharedKeyStore,
};
use crate::config::ApiConfig;
use crate::error::{OperatorError, OperatorResult};
use crate::transport::{RawResponse, SignedTransport};

const REQUESTS_PATH: &str = "request";
const CONFIRM_PATH: &str = "confirm";
const REJECT_PATH: &str = "reject";
const HOT_BALANCE_PATH: &str = "hotbalance";
const INVITE_GENERATE_PATH: &str = "invite/generate";
const INVITE_LIST_PATH: &str = "invite/listmy";

/// Operator decision on a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    Reject,
}

impl Decision {
    pub fn path(self) -> &'static str {
        match self {
            Decision::Confirm => CONFIRM_PATH,
            Decision::Reject => REJECT_PATH,
        }
    }
}

/// Requests listed under one key generation.
struct CachedRequests {
    generation: u64,
    requests: Vec<WithdrawalRequest>,
}

/// Composes key store, signer and transport for each operator action.
pub struct ActionDispatcher {
    keys: SharedKeyStore,
    signer: RequestSigner,
    transport: SignedTransport,
    api: ApiConfig,
    /// Last listed requests. Privileged data, only valid for the key
    /// generation that fetched it.
    requests: RwLock<Option<CachedRequests>>,
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("base_url", &self.api.base_url)
            .finish_non_exhaustive()
    }
}

impl ActionDispatcher {
    pub fn new(api: ApiConfig, keys: SharedKeyStore) -> OperatorResult<Self> {
        let transport = SignedTransport::new(&api)?;
        Ok(Self {
            keys,
            signer: RequestSigner::new(),
            transport,
            api,
            requests: RwLock::new(None),
        })
    }

    pub fn key_store(&self) -> &SharedKeyStore {
        &self.keys
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    /// Load the operator key and fetch the pending requests.
    ///
    /// A key failure clears previously listed requests. A failure of the
    /// initial fetch is returned but leaves the session authenticated.
    pub async fn authenticate(
        &self,
        raw: &[u8],
        format: KeyFormat,
        passphrase: &dyn PassphraseProvider,
    ) -> OperatorResult<Vec<WithdrawalRequest>> {
        if let Err(e) = self.keys.load(raw, format, passphrase).await {
            self.clear_privileged_data().await;
            return Err(e);
        }
        self.list_pending_requests().await
    }

    /// Drop the key and everything fetched with it.
    pub async fn logout(&self) {
        self.keys.clear().await;
        self.clear_privileged_data().await;
    }

    /// Requests from the last successful listing with the current key.
    ///
    /// Empty when unauthenticated or when the key was rejected, cleared or
    /// replaced since the listing, whichever path the key store took.
    pub async fn cached_requests(&self) -> Vec<WithdrawalRequest> {
        let authenticated = self.keys.is_authenticated().await;
        let generation = self.keys.generation().await;

        let mut cache = self.requests.write().await;
        match cache.as_ref() {
            Some(cached) if authenticated && cached.generation == generation => {
                cached.requests.clone()
            }
            Some(cached) if cached.generation < generation || !authenticated => {
                debug!("Dropping requests listed under a previous key");
                *cache = None;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub async fn clear_privileged_data(&self) {
        *self.requests.write().await = None;
    }

    /// Pending withdrawal requests, in server order.
    pub async fn list_pending_requests(&self) -> OperatorResult<Vec<WithdrawalRequest>> {
        let (response, generation) = self
            .signed_call_at_generation(Method::GET, REQUESTS_PATH, None)
            .await?;
        let requests: Vec<WithdrawalRequest> = response.json()?;
        info!(count = requests.len(), "Withdrawal requests listed");

        let mut cache = self.requests.write().await;
        if self.keys.generation().await == generation {
            *cache = Some(CachedRequests {
                generation,
                requests: requests.clone(),
            });
        } else {
            // Key failed or changed while the listing was in flight
            debug!(generation, "Listing outlived its key, not cached");
        }
        Ok(requests)
    }

    /// File a new withdrawal request on behalf of a user.
    pub async fn create_request(&self, request: &WithdrawalRequestInfo) -> OperatorResult<()> {
        let body = body_of(request)?;
        self.signed_call(Method::POST, REQUESTS_PATH, Some(body))
            .await?;
        info!(user = %request.user, amount = request.amount, "Withdrawal request created");
        Ok(())
    }

    pub async fn confirm(&self, request_id: impl Into<RequestId>) -> OperatorResult<()> {
        self.decide(Decision::Confirm, request_id.into()).await
    }

    pub async fn reject(&self, request_id: impl Into<RequestId>) -> OperatorResult<()> {
        self.decide(Decision::Reject, request_id.into()).await
    }

    pub async fn decide(&self, decision: Decision, request_id: RequestId) -> OperatorResult<()> {
        let body = body_of(&ConfirmationData {
            request_id: request_id.clone(),
        })?;
        self.signed_call(Method::POST, decision.path(), Some(body))
            .await?;
        info!(%request_id, ?decision, "Withdrawal decision sent");
        Ok(())
    }

    /// Hot wallet balance.
    pub async fn hot_balance(&self) -> OperatorResult<HotBalanceResponse> {
        self.signed_call(Method::POST, HOT_BALANCE_PATH, None)
            .await?
            .json()
    }

    /// Generate an invite for a new user.
    pub async fn generate_invite(&self, label: impl Into<String>) -> OperatorResult<InviteResp> {
        let body = body_of(&InviteRequest {
            label: label.into(),
        })?;
        let invite: InviteResp = self
            .signed_call(Method::POST, INVITE_GENERATE_PATH, Some(body))
            .await?
            .json()?;
        info!(invite = %invite.invite.invite, "Invite generated");
        Ok(invite)
    }

    /// Invites generated with the current operator key.
    pub async fn list_my_invites(&self) -> OperatorResult<Vec<InviteResp>> {
        self.signed_call(Method::GET, INVITE_LIST_PATH, None)
            .await?
            .json()
    }

    async fn signed_call(
        &self,
        method: Method,
        path: &str,
        body: Option<SerializedBody>,
    ) -> OperatorResult<RawResponse> {
        self.signed_call_at_generation(method, path, body)
            .await
            .map(|(response, _)| response)
    }

    /// Signed call, returning the key generation that signed it.
    async fn signed_call_at_generation(
        &self,
        method: Method,
        path: &str,
        body: Option<SerializedBody>,
    ) -> OperatorResult<(RawResponse, u64)> {
        if !self.keys.is_authenticated().await {
            return Err(OperatorError::NotAuthenticated);
        }
        // Snapshot of the key: a concurrent re-import does not affect this call
        let (handle, public_key, generation) = self
            .keys
            .export_with_generation()
            .await
            .map_err(|_| OperatorError::NotAuthenticated)?;

        let url = self.api.endpoint(path);
        let signed = self
            .signer
            .sign_request(&url, body, &handle, &public_key)
            .inspect_err(|e| warn!(url = %url, "Failed to sign request: {}", e))?;
        let response = self.transport.send_signed(method, &signed).await?;
        let response = response.error_for_status().map_err(|e| {
            warn!(url = %url, nonce = signed.nonce, "Operator API refused request: {}", e);
            OperatorError::from(e)
        })?;
        Ok((response, generation))
    }
}

fn body_of<T: Serialize>(value: &T) -> OperatorResult<SerializedBody> {
    SerializedBody::from_value(value)
}
