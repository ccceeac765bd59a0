//! Top-level error type for the proxy.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. `ProxyError` has one
//! variant per error *source*; the finer-grained classification the Forwarding Engine
//! needs to decide retry/failover behavior lives in [`crate::core::errors::ErrorKind`]
//! and is carried inside the `Forwarding` variant rather than folded into this enum.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Top-level error type for the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration file missing, malformed, or failing validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem I/O failure (config store, tracker store, lock files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint registry conflict: duplicate name on add, missing name on update/remove.
    #[error("registry error: {0}")]
    Registry(String),

    /// Group manager rejected an operation (unknown group name).
    #[error("group error: {0}")]
    Group(String),

    /// A forwarding attempt failed; carries the classified error kind and message.
    #[error("forwarding failed: {kind:?}: {message}")]
    Forwarding {
        kind: crate::core::errors::ErrorKind,
        message: String,
    },

    /// No endpoint was available to serve the request.
    #[error("no healthy endpoint available")]
    NoHealthyEndpoints,

    /// Underlying HTTP client error while dialing an upstream endpoint.
    #[error("upstream request error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Durable store (tracker or config) could not complete a write.
    #[error("durable store error: {0}")]
    Store(String),
}

impl ProxyError {
    /// Build a [`ProxyError::Forwarding`] from a classified error.
    pub fn forwarding(kind: crate::core::errors::ErrorKind, message: impl Into<String>) -> Self {
        ProxyError::Forwarding {
            kind,
            message: message.into(),
        }
    }
}
