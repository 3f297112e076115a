pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod transport;

pub use config::OperatorConfig;
pub use dispatcher::{ActionDispatcher, Decision};
pub use error::{OperatorError, OperatorResult, TransportError};
