//! End-to-end tests of the operator flow against a mock operator API.
//!
//! The mock verifies every credential the way the real API does: it rebuilds
//! the canonical message from the URL and body it received and checks the
//! signature against the public key carried in the header.

use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::SecretKey;
use pkcs8::pkcs5::pbes2;
use pkcs8::PrivateKeyInfo;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use custody_operator::auth::{
    create_key_store, verify_credential, Credential, KeyFormat, NoPassphrase, SessionState,
    StaticPassphrase, SIGNATURE_HEADER,
};
use custody_operator::config::ApiConfig;
use custody_operator::{ActionDispatcher, OperatorError, TransportError};
use custody_operator_types::{Currency, CurrencyAddress, RequestId, WithdrawalRequestInfo};

const INVITE_ID: &str = "6f1c2b7e-3d4a-4c5b-9e8f-0a1b2c3d4e5f";

fn random_key() -> SecretKey {
    SecretKey::random(&mut rand::rngs::OsRng)
}

fn pkcs8_pem(secret: &SecretKey) -> String {
    secret.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
}

fn pkcs8_der(secret: &SecretKey) -> Vec<u8> {
    secret.to_pkcs8_der().unwrap().as_bytes().to_vec()
}

fn public_pem(secret: &SecretKey) -> String {
    secret.public_key().to_public_key_pem(LineEnding::LF).unwrap()
}

fn encrypted_pem(secret: &SecretKey, passphrase: &str) -> String {
    let der = secret.to_pkcs8_der().unwrap();
    let info = PrivateKeyInfo::try_from(der.as_bytes()).unwrap();
    let params =
        pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, b"integration-salt", &[3u8; 16]).unwrap();
    info.encrypt_with_params(params, passphrase)
        .unwrap()
        .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
        .unwrap()
        .to_string()
}

fn withdrawal(id: u64, user: &str) -> Value {
    json!({
        "id": id,
        "user": user,
        "address": { "BTC": format!("bc1q{}", user) },
        "created_at": "2022-06-01 12:00:00",
        "amount": 1000 + id,
        "confirmation_status": null
    })
}

/// A request the mock accepted.
#[derive(Debug, Clone)]
struct Received {
    path: String,
    body: Option<String>,
    credential: Credential,
}

#[derive(Clone)]
struct MockState {
    base_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    received: Arc<Mutex<Vec<Received>>>,
    fail_with: Arc<Mutex<Option<StatusCode>>>,
}

/// Mock operator API.
struct MockOperatorApi {
    state: MockState,
    _task: tokio::task::JoinHandle<()>,
}

impl MockOperatorApi {
    async fn start(requests: Vec<Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = MockState {
            base_url: format!("http://{}", addr),
            requests: Arc::new(Mutex::new(requests)),
            received: Arc::new(Mutex::new(Vec::new())),
            fail_with: Arc::new(Mutex::new(None)),
        };

        let app = Router::new()
            .route("/request", get(handle).post(handle))
            .route("/confirm", post(handle))
            .route("/reject", post(handle))
            .route("/hotbalance", post(handle))
            .route("/invite/generate", post(handle))
            .route("/invite/listmy", get(handle))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, _task: task }
    }

    fn base_url(&self) -> &str {
        &self.state.base_url
    }

    fn dispatcher(&self) -> ActionDispatcher {
        ActionDispatcher::new(ApiConfig::new(self.base_url()), create_key_store()).unwrap()
    }

    async fn fail_with(&self, status: Option<StatusCode>) {
        *self.state.fail_with.lock().await = status;
    }

    async fn received(&self) -> Vec<Received> {
        self.state.received.lock().await.clone()
    }
}

async fn handle(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(header) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::FORBIDDEN, "missing credential").into_response();
    };
    let Ok(credential) = Credential::parse(header) else {
        return (StatusCode::FORBIDDEN, "malformed credential").into_response();
    };

    let url = format!("{}{}", state.base_url, uri.path());
    let body = (!body.is_empty()).then_some(body);
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    if body.is_some() && content_type != Some("application/json") {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected json").into_response();
    }
    if verify_credential(&url, body.as_deref(), &credential).is_err() {
        return (StatusCode::FORBIDDEN, "bad signature").into_response();
    }

    state.received.lock().await.push(Received {
        path: uri.path().to_string(),
        body: body.clone(),
        credential,
    });

    if let Some(status) = *state.fail_with.lock().await {
        return (status, "Internal server error").into_response();
    }

    match uri.path() {
        "/request" if method == Method::POST => {
            let Some(info) = body.as_deref().and_then(|b| serde_json::from_str::<Value>(b).ok())
            else {
                return StatusCode::UNPROCESSABLE_ENTITY.into_response();
            };
            let mut requests = state.requests.lock().await;
            let id = requests.len() as u64 + 1;
            requests.push(json!({
                "id": id,
                "user": info["user"],
                "address": info["address"],
                "created_at": "2022-06-02 08:30:00",
                "amount": info["amount"],
                "confirmation_status": null
            }));
            StatusCode::CREATED.into_response()
        }
        "/request" => Json(state.requests.lock().await.clone()).into_response(),
        "/hotbalance" => Json(json!({ "balance": 123456789 })).into_response(),
        "/invite/generate" => {
            let label = body
                .as_deref()
                .and_then(|b| serde_json::from_str::<Value>(b).ok())
                .and_then(|v| v["label"].as_str().map(str::to_string))
                .unwrap_or_default();
            Json(json!({ "invite": { "invite": INVITE_ID }, "label": label })).into_response()
        }
        "/invite/listmy" => {
            Json(json!([{ "invite": { "invite": INVITE_ID }, "label": "first" }])).into_response()
        }
        _ => StatusCode::OK.into_response(),
    }
}

#[tokio::test]
async fn test_empty_request_list() {
    let api = MockOperatorApi::start(Vec::new()).await;
    let dispatcher = api.dispatcher();

    let requests = dispatcher
        .authenticate(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();
    assert!(requests.is_empty());
    assert!(dispatcher.cached_requests().await.is_empty());

    let received = api.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].path, "/request");
    assert!(received[0].body.is_none());
}

#[tokio::test]
async fn test_requests_listed_in_server_order() {
    let api = MockOperatorApi::start(vec![
        withdrawal(3, "carol"),
        withdrawal(1, "alice"),
        withdrawal(2, "bob"),
    ])
    .await;
    let dispatcher = api.dispatcher();

    let requests = dispatcher
        .authenticate(&pkcs8_der(&random_key()), KeyFormat::Der, &NoPassphrase)
        .await
        .unwrap();
    let ids: Vec<RequestId> = requests.iter().map(|r| r.id.clone()).collect();
    assert_eq!(
        ids,
        vec![RequestId::Number(3), RequestId::Number(1), RequestId::Number(2)]
    );
    assert_eq!(requests[1].user, "alice");
    assert_eq!(requests[1].address.address, "bc1qalice");
    assert_eq!(dispatcher.cached_requests().await, requests);
}

#[tokio::test]
async fn test_confirm_signs_canonical_message() {
    let secret = random_key();
    let api = MockOperatorApi::start(vec![withdrawal(42, "dave")]).await;
    let dispatcher = api.dispatcher();
    dispatcher
        .authenticate(pkcs8_pem(&secret).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();

    dispatcher.confirm(42u64).await.unwrap();
    dispatcher.reject("42").await.unwrap();

    let received = api.received().await;
    assert_eq!(received.len(), 3);

    let confirm = &received[1];
    assert_eq!(confirm.path, "/confirm");
    assert_eq!(confirm.body.as_deref(), Some(r#"{"request_id":42}"#));
    assert_eq!(
        confirm.credential.public_key,
        secret.public_key().to_public_key_der().unwrap().as_bytes()
    );
    verify_credential(
        &format!("{}/confirm", api.base_url()),
        Some(r#"{"request_id":42}"#),
        &confirm.credential,
    )
    .unwrap();

    let reject = &received[2];
    assert_eq!(reject.path, "/reject");
    assert_eq!(reject.body.as_deref(), Some(r#"{"request_id":42}"#));
    assert!(reject.credential.nonce > confirm.credential.nonce);
}

#[tokio::test]
async fn test_encrypted_key_and_wrong_passphrases() {
    let api = MockOperatorApi::start(vec![withdrawal(1, "erin")]).await;
    let dispatcher = api.dispatcher();
    let pem = encrypted_pem(&random_key(), "correct horse");

    for _ in 0..3 {
        let err = dispatcher
            .authenticate(pem.as_bytes(), KeyFormat::Pem, &StaticPassphrase::new("battery"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::WrongPassphrase));
        assert_eq!(
            dispatcher.key_store().state().await,
            SessionState::Unauthenticated
        );
    }
    assert!(api.received().await.is_empty());

    let requests = dispatcher
        .authenticate(pem.as_bytes(), KeyFormat::Pem, &StaticPassphrase::new("correct horse"))
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_server_error_keeps_session() {
    let api = MockOperatorApi::start(vec![withdrawal(5, "frank")]).await;
    let dispatcher = api.dispatcher();
    dispatcher
        .authenticate(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();

    api.fail_with(Some(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let err = dispatcher.confirm(5u64).await.unwrap_err();
    match err {
        OperatorError::Transport(TransportError::Status { status, body }) => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "Internal server error");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(dispatcher.key_store().is_authenticated().await);
    assert_eq!(dispatcher.cached_requests().await.len(), 1);

    api.fail_with(None).await;
    dispatcher.confirm(5u64).await.unwrap();
}

#[tokio::test]
async fn test_public_key_clears_privileged_data() {
    let api = MockOperatorApi::start(vec![withdrawal(1, "gina"), withdrawal(2, "hank")]).await;
    let dispatcher = api.dispatcher();
    dispatcher
        .authenticate(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();
    assert_eq!(dispatcher.cached_requests().await.len(), 2);

    let err = dispatcher
        .authenticate(public_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap_err();
    assert!(matches!(err, OperatorError::NotAPrivateKey));
    assert!(dispatcher.cached_requests().await.is_empty());
    assert!(matches!(
        dispatcher.confirm(1u64).await,
        Err(OperatorError::NotAuthenticated)
    ));
    // Only the initial listing reached the server
    assert_eq!(api.received().await.len(), 1);
}

#[tokio::test]
async fn test_unauthenticated_actions_send_nothing() {
    let api = MockOperatorApi::start(vec![withdrawal(1, "ivan")]).await;
    let dispatcher = api.dispatcher();

    assert!(matches!(
        dispatcher.list_pending_requests().await,
        Err(OperatorError::NotAuthenticated)
    ));
    assert!(matches!(
        dispatcher.reject(1u64).await,
        Err(OperatorError::NotAuthenticated)
    ));
    assert!(matches!(
        dispatcher.generate_invite("new user").await,
        Err(OperatorError::NotAuthenticated)
    ));
    assert!(api.received().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_actions_use_distinct_nonces() {
    let api = MockOperatorApi::start(vec![withdrawal(1, "judy"), withdrawal(2, "ken")]).await;
    let dispatcher = api.dispatcher();
    dispatcher
        .authenticate(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();

    let (a, b, c) = tokio::join!(
        dispatcher.confirm(1u64),
        dispatcher.reject(2u64),
        dispatcher.hot_balance()
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(c.unwrap().balance, 123456789);

    let mut nonces: Vec<u64> = api
        .received()
        .await
        .iter()
        .map(|r| r.credential.nonce)
        .collect();
    assert_eq!(nonces.len(), 4);
    nonces.sort_unstable();
    nonces.dedup();
    assert_eq!(nonces.len(), 4);
}

#[tokio::test]
async fn test_invites() {
    let api = MockOperatorApi::start(Vec::new()).await;
    let dispatcher = api.dispatcher();
    dispatcher
        .authenticate(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();

    let invite = dispatcher.generate_invite("new user").await.unwrap();
    assert_eq!(invite.label, "new user");
    assert_eq!(invite.invite.invite.to_string(), INVITE_ID);

    let invites = dispatcher.list_my_invites().await.unwrap();
    assert_eq!(invites.len(), 1);
    assert_eq!(invites[0].label, "first");

    let received = api.received().await;
    assert_eq!(received[1].body.as_deref(), Some(r#"{"label":"new user"}"#));
    assert!(received[2].body.is_none());
}

#[tokio::test]
async fn test_create_request_is_signed_and_listed() {
    let api = MockOperatorApi::start(Vec::new()).await;
    let dispatcher = api.dispatcher();
    dispatcher
        .authenticate(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();

    let request = WithdrawalRequestInfo {
        user: "lena".to_string(),
        address: CurrencyAddress {
            currency: Currency::Native("BTC".to_string()),
            address: "bc1qlena".to_string(),
        },
        amount: 2500,
    };
    dispatcher.create_request(&request).await.unwrap();

    let received = api.received().await;
    assert_eq!(received[1].path, "/request");
    let body = r#"{"user":"lena","address":{"BTC":"bc1qlena"},"amount":2500}"#;
    assert_eq!(received[1].body.as_deref(), Some(body));
    verify_credential(
        &format!("{}/request", api.base_url()),
        Some(body),
        &received[1].credential,
    )
    .unwrap();

    let listed = dispatcher.list_pending_requests().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].user, "lena");
    assert_eq!(listed[0].address, request.address);
    assert_eq!(listed[0].amount, 2500);
}

#[tokio::test]
async fn test_key_store_failure_drops_cached_requests() {
    let api = MockOperatorApi::start(vec![withdrawal(1, "mike"), withdrawal(2, "nina")]).await;
    let dispatcher = api.dispatcher();
    dispatcher
        .authenticate(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();
    assert_eq!(dispatcher.cached_requests().await.len(), 2);

    // Key fails through the store, not through the dispatcher
    let keys = dispatcher.key_store();
    assert!(keys.import(b"garbage", KeyFormat::Pem).await.is_err());
    keys.load(pkcs8_pem(&random_key()).as_bytes(), KeyFormat::Pem, &NoPassphrase)
        .await
        .unwrap();

    assert!(keys.is_authenticated().await);
    assert!(dispatcher.cached_requests().await.is_empty());

    // A fresh listing under the new key is cached again
    dispatcher.list_pending_requests().await.unwrap();
    assert_eq!(dispatcher.cached_requests().await.len(), 2);
}
