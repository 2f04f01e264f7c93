use probelink_client::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine has been stopped")]
    Stopped,

    #[error("outbound queue is full")]
    QueueFull,

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("invalid broker url: {0}")]
    InvalidUrl(String),

    #[error("password is not valid base64 utf-8: {0}")]
    Password(String),

    #[error("message could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("broker link error: {0}")]
    Link(#[from] LinkError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("sequence {sequence} was already assigned, next is {next}")]
    SequenceReused { sequence: u64, next: u64 },

    #[error("sequence {0} is not pending")]
    NotPending(u64),
}
