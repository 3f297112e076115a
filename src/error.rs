use reqwest::StatusCode;
use thiserror::Error;

/// Failure to deliver a signed request or a non-success reply to it.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl TransportError {
    /// HTTP status of the reply, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Network(e) => e.status(),
            Self::Status { status, .. } => Some(*status),
        }
    }
}

/// Operator-wide error types
#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unrecognized key encoding: {0}")]
    Parse(String),

    #[error("Wrong password")]
    WrongPassphrase,

    #[error("The selected key is not private")]
    NotAPrivateKey,

    #[error("No signing key loaded")]
    NoKeyLoaded,

    #[error("Operator is not authenticated")]
    NotAuthenticated,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OperatorError {
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    pub fn signing<S: Into<String>>(msg: S) -> Self {
        Self::Signing(msg.into())
    }

    /// Errors caused by the key itself. These reset the session to
    /// unauthenticated; every other error leaves it untouched.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::WrongPassphrase | Self::NotAPrivateKey
        )
    }
}

impl From<reqwest::Error> for OperatorError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(TransportError::Network(e))
    }
}

/// Result type alias using OperatorError
pub type OperatorResult<T> = Result<T, OperatorError>;
