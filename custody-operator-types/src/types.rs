use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::currency::{Currency, CurrencyAddress};

/// Identifier of a withdrawal request.
///
/// The platform issues UUIDs, older deployments used integer ids. Both are
/// echoed back verbatim in decision bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId::Number(value)
    }
}

impl From<Uuid> for RequestId {
    fn from(value: Uuid) -> Self {
        RequestId::Text(value.to_string())
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        match value.parse::<u64>() {
            Ok(n) => RequestId::Number(n),
            Err(_) => RequestId::Text(value.to_string()),
        }
    }
}

/// Pending withdrawal request as listed by the operator API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: RequestId,
    /// User which initiated the withdrawal
    pub user: String,
    /// Receiving address
    pub address: CurrencyAddress,
    pub created_at: String,
    /// Amount in the currency's smallest unit
    pub amount: u64,
    /// Server-side review state, passed through for display
    #[serde(default)]
    pub confirmation_status: Value,
}

impl WithdrawalRequest {
    pub fn currency(&self) -> &Currency {
        &self.address.currency
    }
}

/// Body of a new withdrawal request filed by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequestInfo {
    /// User which initiated the withdrawal
    pub user: String,
    /// Receiving address
    pub address: CurrencyAddress,
    /// Amount in the currency's smallest unit
    pub amount: u64,
}

/// Body of a confirm or reject decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationData {
    pub request_id: RequestId,
}

/// Hot wallet balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotBalanceResponse {
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invite {
    pub invite: Uuid,
}

/// Invite generated by an operator, labelled for bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteResp {
    pub invite: Invite,
    pub label: String,
}
