//! Unified error handling for the gridscan crate
//!
//! Grid operations deliberately distinguish two failure channels: conditions
//! that cross the RPC boundary as a plain `false` (authorization failures,
//! role violations, idempotence guards) and conditions that surface as real
//! errors to the local caller (malformed input, report failures, transport
//! breakdown). The `Error` enum covers the latter; the former never raise.

use std::io;
use thiserror::Error;

pub use crate::grid::client::ClientError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Authorization and role failures
    Auth,
    /// Grid protocol failures (malformed descriptors, bad state)
    Grid,
    /// Peer transport failures (unreachable, timeout)
    Transport,
    /// Report generation failures
    Report,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the gridscan crate
#[derive(Error, Debug)]
pub enum Error {
    /// Privileged call without a valid token on a master
    #[error("unauthorized: invalid grid token")]
    Unauthorized,

    /// Operation invalid for the current role
    #[error("role violation: {0}")]
    RoleViolation(&'static str),

    /// Malformed instance descriptor
    #[error("missing field: {0}")]
    MissingField(String),

    /// Unknown report component
    #[error("component not found: {0}")]
    ComponentNotFound(String),

    /// Report component cannot write an outfile
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Peer unreachable or timed out
    #[error("rpc transport error: {0}")]
    RpcTransport(#[from] ClientError),

    /// `run` called while a scan is in flight
    #[error("scan already running")]
    AlreadyRunning,

    /// `clean_up` called twice
    #[error("scan already cleaned up")]
    AlreadyCleanedUp,

    /// Configuration errors
    #[error("config error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Check if this error is recoverable (the operation can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RpcTransport(_) | Self::Http(_) | Self::Io(_) => true,
            Self::Unauthorized
            | Self::RoleViolation(_)
            | Self::MissingField(_)
            | Self::ComponentNotFound(_)
            | Self::UnsupportedFormat(_)
            | Self::AlreadyRunning
            | Self::AlreadyCleanedUp
            | Self::Config(_)
            | Self::Json(_) => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized | Self::RoleViolation(_) => ErrorCategory::Auth,
            Self::MissingField(_) | Self::AlreadyRunning | Self::AlreadyCleanedUp => {
                ErrorCategory::Grid
            }
            Self::RpcTransport(_) | Self::Http(_) => ErrorCategory::Transport,
            Self::ComponentNotFound(_) | Self::UnsupportedFormat(_) => ErrorCategory::Report,
            Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) | Self::Json(_) => ErrorCategory::Other,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(Error::Unauthorized.category(), ErrorCategory::Auth);
        assert_eq!(
            Error::RoleViolation("slave cannot enslave").category(),
            ErrorCategory::Auth
        );
        assert_eq!(
            Error::ComponentNotFound("xml".to_string()).category(),
            ErrorCategory::Report
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(!Error::Unauthorized.is_recoverable());
        assert!(!Error::AlreadyRunning.is_recoverable());
        assert!(Error::RpcTransport(ClientError::NetworkError("refused".into())).is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("invalid rpc_port");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(err.to_string().contains("invalid rpc_port"));
    }
}
