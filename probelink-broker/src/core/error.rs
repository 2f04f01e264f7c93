use probelink_protocol::reply_code::{NOT_FOUND, PRECONDITION_FAILED};
use probelink_protocol::ExchangeKind;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("NOT_FOUND - no exchange '{0}'")]
    NoExchange(String),

    #[error("NOT_FOUND - no queue '{0}'")]
    NoQueue(String),

    #[error("PRECONDITION_FAILED - exchange '{name}' is {existing}, cannot redeclare as {requested}")]
    KindMismatch {
        name: String,
        existing: ExchangeKind,
        requested: ExchangeKind,
    },

    #[error("PRECONDITION_FAILED - {0} name must not be empty")]
    EmptyName(&'static str),

    #[error("NOT_FOUND - no consumer '{0}'")]
    NoConsumer(String),
}

impl BrokerError {
    /// Reply code for the channel close this error causes.
    pub fn reply_code(&self) -> u16 {
        match self {
            BrokerError::NoExchange(_) | BrokerError::NoQueue(_) | BrokerError::NoConsumer(_) => {
                NOT_FOUND
            }
            BrokerError::KindMismatch { .. } | BrokerError::EmptyName(_) => PRECONDITION_FAILED,
        }
    }
}
