use std::io;

use cid::Cid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("storage error during {operation}: {details}")]
    StorageError { operation: String, details: String },

    #[error("{format} serialization error: {details}")]
    SerializationError { format: String, details: String },

    #[error("invalid transition: deal {proposal} in state {status} cannot handle {event}")]
    InvalidStateTransition { proposal: Cid, status: String, event: String },

    #[error("deal not found: {0}")]
    DealNotFound(Cid),

    #[error("deal already tracked: {0}")]
    DealExists(Cid),

    #[error("deal {proposal} is in state {status}, expected {expected}")]
    UnexpectedDealStatus { proposal: Cid, status: String, expected: String },

    #[error("{0}")]
    NodeError(String),

    #[error("transport error during {operation}: {details}")]
    TransportError { operation: String, details: String },

    #[error("file not found")]
    FileNotFound,

    #[error("could not verify signature")]
    SignatureInvalid,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("engine stopped")]
    EngineStopped,

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, MarketError>;

impl MarketError {
    pub fn storage(operation: impl Into<String>, details: impl ToString) -> Self {
        MarketError::StorageError { operation: operation.into(), details: details.to_string() }
    }

    pub fn msg(details: impl Into<String>) -> Self {
        MarketError::Message(details.into())
    }
}

impl From<io::Error> for MarketError {
    fn from(err: io::Error) -> Self {
        MarketError::StorageError { operation: "io".to_string(), details: err.to_string() }
    }
}

impl From<rocksdb::Error> for MarketError {
    fn from(err: rocksdb::Error) -> Self {
        MarketError::StorageError { operation: "rocksdb".to_string(), details: err.to_string() }
    }
}

impl From<fvm_ipld_encoding::Error> for MarketError {
    fn from(err: fvm_ipld_encoding::Error) -> Self {
        MarketError::SerializationError { format: "cbor".to_string(), details: err.to_string() }
    }
}

impl From<toml::de::Error> for MarketError {
    fn from(err: toml::de::Error) -> Self {
        MarketError::ConfigError(format!("TOML parsing error: {}", err))
    }
}
