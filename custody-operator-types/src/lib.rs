//! Wire types for the custody operator API.
//!
//! These are the JSON payloads exchanged with the operator endpoints:
//! withdrawal requests listed for review, the decision body sent on
//! confirm/reject, and the invite and hot balance responses.

pub mod currency;
pub mod types;

pub use currency::{Currency, CurrencyAddress, CurrencyError};
pub use types::{
    ConfirmationData, HotBalanceResponse, Invite, InviteRequest, InviteResp, RequestId,
    WithdrawalRequest, WithdrawalRequestInfo,
};
