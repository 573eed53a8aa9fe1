use murmur_shared::{CryptoError, EndpointError, MurmurError};
use murmur_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] MurmurError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Envelope nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Endpoint is not deliverable: {0:?}")]
    Undeliverable(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected response status {0}")]
    Status(u16),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Proxy configuration error: {0}")]
    Proxy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
