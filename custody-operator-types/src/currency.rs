//! Currency model of the operator API.
//!
//! The server encodes a currency either as a bare tag (`"BTC"`) or as an
//! object keyed by the token standard with a nested ticker
//! (`{"ERC20": {"ticker": "USDT", ..}}`). Both shapes are resolved into
//! [`Currency`] once, at deserialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Errors raised while resolving currency payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurrencyError {
    #[error("expected exactly one currency entry, found {0}")]
    EntryCount(usize),

    #[error("token of {0} has no ticker")]
    MissingTicker(String),

    #[error("no destination address for {0}")]
    MissingAddress(String),

    #[error("unexpected currency value: {0}")]
    Unexpected(String),
}

/// A currency handled by the custody platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Currency {
    /// A chain's own coin, e.g. `BTC` or `ETH`.
    Native(String),
    /// A token issued on a parent chain, e.g. an `ERC20` token `USDT`.
    Token { chain: String, ticker: String },
}

impl Currency {
    /// Ticker shown to the operator.
    pub fn ticker(&self) -> &str {
        match self {
            Currency::Native(tag) => tag,
            Currency::Token { ticker, .. } => ticker,
        }
    }

    /// Parent chain (token standard) for tokens, `None` for native coins.
    pub fn parent_chain(&self) -> Option<&str> {
        match self {
            Currency::Native(_) => None,
            Currency::Token { chain, .. } => Some(chain),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Native(tag) => write!(f, "{}", tag),
            Currency::Token { chain, ticker } => write!(f, "{} ({})", ticker, chain),
        }
    }
}

impl TryFrom<Value> for Currency {
    type Error = CurrencyError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(tag) if !tag.is_empty() => Ok(Currency::Native(tag)),
            Value::Object(map) => {
                let (chain, inner) = single_entry(map)?;
                let ticker =
                    ticker_of(&inner).ok_or_else(|| CurrencyError::MissingTicker(chain.clone()))?;
                Ok(Currency::Token { chain, ticker })
            }
            other => Err(CurrencyError::Unexpected(other.to_string())),
        }
    }
}

impl From<Currency> for Value {
    fn from(currency: Currency) -> Self {
        match currency {
            Currency::Native(tag) => Value::String(tag),
            Currency::Token { chain, ticker } => {
                let mut token = Map::new();
                token.insert("ticker".to_string(), Value::String(ticker));
                let mut outer = Map::new();
                outer.insert(chain, Value::Object(token));
                Value::Object(outer)
            }
        }
    }
}

/// Destination of a withdrawal: a currency mapped to exactly one address.
///
/// Accepted shapes:
/// - `{"BTC": "bc1.."}` or `{"BTC": {"addr": "bc1.."}}`
/// - `{"ETH": {"account": "0x.."}}`
/// - `{"ERC20": {"token": {"ticker": "USDT", ..}, "account": {"account": "0x.."}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct CurrencyAddress {
    pub currency: Currency,
    pub address: String,
}

impl TryFrom<Map<String, Value>> for CurrencyAddress {
    type Error = CurrencyError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let (key, inner) = single_entry(map)?;

        if let Some(token) = inner.get("token") {
            let ticker = ticker_of(token).ok_or_else(|| CurrencyError::MissingTicker(key.clone()))?;
            let address = inner
                .get("account")
                .and_then(address_of)
                .ok_or_else(|| CurrencyError::MissingAddress(key.clone()))?;
            return Ok(CurrencyAddress {
                currency: Currency::Token { chain: key, ticker },
                address,
            });
        }

        let address = address_of(&inner).ok_or_else(|| CurrencyError::MissingAddress(key.clone()))?;
        Ok(CurrencyAddress {
            currency: Currency::Native(key),
            address,
        })
    }
}

impl From<CurrencyAddress> for Map<String, Value> {
    fn from(value: CurrencyAddress) -> Self {
        let mut map = Map::new();
        match value.currency {
            Currency::Native(tag) => {
                map.insert(tag, Value::String(value.address));
            }
            Currency::Token { chain, ticker } => {
                let mut token = Map::new();
                token.insert("ticker".to_string(), Value::String(ticker));
                let mut inner = Map::new();
                inner.insert("token".to_string(), Value::Object(token));
                inner.insert("account".to_string(), Value::String(value.address));
                map.insert(chain, Value::Object(inner));
            }
        }
        map
    }
}

fn single_entry(map: Map<String, Value>) -> Result<(String, Value), CurrencyError> {
    if map.len() != 1 {
        return Err(CurrencyError::EntryCount(map.len()));
    }
    map.into_iter().next().ok_or(CurrencyError::EntryCount(0))
}

fn ticker_of(value: &Value) -> Option<String> {
    value.get("ticker").and_then(Value::as_str).map(str::to_owned)
}

/// A bare string, or an object with a single string field
/// (`{"addr": ..}` for bitcoin, `{"account": ..}` for ethereum).
fn address_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(fields) if fields.len() == 1 => fields
            .values()
            .next()
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}
