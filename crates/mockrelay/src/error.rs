//! Error taxonomy for the mockrelay engine.
//!
//! Validation problems are rejected up front, resolution misses are not
//! errors, and proxy upstream failures never surface here (they become a
//! synthetic 502 envelope instead).

use thiserror::Error;

/// Errors from the file-backed keyed store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write store file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("store file {path} is not a valid JSON object map: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to encode store state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid store value: {0}")]
    Invalid(String),
}

/// Errors from mock rule CRUD and validation.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("mock '{0}' not found")]
    NotFound(String),
    #[error("mock '{0}' already exists")]
    Duplicate(String),
    #[error("invalid mock payload: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from response generation.
///
/// Only function-type failures and store write-backs land here; proxy
/// upstream failures are mapped to a 502 response by the proxy generator.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no responder registered for handler '{0}'")]
    UnknownHandler(String),
    #[error("function responder '{handler}' failed: {message}")]
    Handler { handler: String, message: String },
    #[error("stateful mock '{0}' has no states")]
    EmptyStates(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the control-plane transport.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("connection closed")]
    Closed,
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("peer replied with error: {0}")]
    Remote(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
