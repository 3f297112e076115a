//! HTTP delivery of signed requests.
//!
//! The transport attaches the credential header and sends the body bytes that
//! were signed. It never retries: a retry must be signed again under a fresh
//! nonce.

use bytes::Bytes;
use reqwest::header::{HeaderName, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};

use crate::auth::{Credential, SerializedBody, SignedRequest};
use crate::config::ApiConfig;
use crate::error::{OperatorResult, TransportError};

/// Raw reply to a signed request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Turn a non-2xx reply into [`TransportError::Status`].
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(TransportError::Status {
            status: self.status,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> OperatorResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Client for sending signed requests to the operator API
pub struct SignedTransport {
    http: Client,
    header: HeaderName,
}

impl std::fmt::Debug for SignedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTransport")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl SignedTransport {
    /// Create a new transport from config
    pub fn new(config: &ApiConfig) -> OperatorResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(TransportError::from)?;

        let header = HeaderName::from_bytes(config.signature_header.as_bytes()).map_err(|e| {
            config::ConfigError::Message(format!(
                "invalid signature header {:?}: {}",
                config.signature_header, e
            ))
        })?;

        Ok(Self { http, header })
    }

    /// Send one request with `credential` attached.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&SerializedBody>,
        credential: &Credential,
    ) -> Result<RawResponse, TransportError> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(&self.header, credential.header_value());
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.as_str().to_owned());
        }

        debug!(%method, url, nonce = credential.nonce, "Sending signed request");
        let response = request.send().await.map_err(|e| {
            error!("Signed request to {} failed: {}", url, e);
            TransportError::Network(e)
        })?;

        let status = response.status();
        let body = response.bytes().await?;
        debug!(%status, url, "Signed request answered");
        Ok(RawResponse { status, body })
    }

    pub async fn send_signed(
        &self,
        method: Method,
        request: &SignedRequest,
    ) -> Result<RawResponse, TransportError> {
        self.send(method, &request.url, request.body.as_ref(), &request.credential)
            .await
    }
}
