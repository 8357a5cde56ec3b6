//! Error taxonomy for the termgate gateway
//!
//! Errors are grouped by the layer that produces them. Protocol- and
//! crypto-layer failures (`AuthError`, `KeyMaterialError`) are handled close
//! to where they occur; session-layer failures (`ConnectionError`,
//! `RpcError`, `ValidationError`) are always surfaced to the caller with
//! enough structure to tell retryable from non-retryable.

use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

use tg_proto::RpcErrorKind;

/// Top-level error type for the termgate ecosystem
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Enrollment authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Key or certificate material error
    #[error("Key material error: {0}")]
    KeyMaterial(#[from] KeyMaterialError),

    /// Outbound connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Worker RPC error
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persistence backend error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Enrollment-time authentication failures
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token or credential did not validate
    #[error("Authentication failed")]
    AuthenticationFailure,

    /// Too many recent failures from this source
    #[error("Rate limited: {0}")]
    RateLimited(IpAddr),

    /// The token-validation collaborator was unreachable
    #[error("Token validation unavailable: {0}")]
    ValidatorUnavailable(String),
}

/// Host-key and certificate bundle failures
#[derive(Error, Debug)]
pub enum KeyMaterialError {
    /// Key generation failed
    #[error("Key generation failed: {0}")]
    Generation(String),

    /// Key material could not be parsed
    #[error("Key parse failed: {0}")]
    Parse(String),

    /// Certificate bundle generation failed (fatal, nothing written)
    #[error("Certificate bundle failed: {0}")]
    Bundle(String),

    /// I/O while persisting key material
    #[error("Key I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors reaching a target host
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Credentials rejected by the target host
    #[error("Authentication failed for connection {0}")]
    AuthenticationFailed(String),

    /// Host could not be reached
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    /// Presented host key did not match the recorded fingerprint
    #[error("Host key mismatch for connection {0}")]
    HostKeyMismatch(String),

    /// Connection was closed underneath us
    #[error("Connection closed: {0}")]
    Closed(String),

    /// No such connection record
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),
}

/// Worker RPC failures, classified for the caller's retry policy
#[derive(Error, Debug)]
pub enum RpcError {
    /// Network trouble or timeout; may be retried after reconciling
    #[error("Transient RPC failure: {0}")]
    Transient(String),

    /// Worker definitively rejected the request; must not be retried
    #[error("Terminal RPC failure: {0}")]
    Terminal(String),
}

impl RpcError {
    /// Classification of this failure.
    pub fn kind(&self) -> RpcErrorKind {
        match self {
            RpcError::Transient(_) => RpcErrorKind::Transient,
            RpcError::Terminal(_) => RpcErrorKind::Terminal,
        }
    }

    /// Whether the caller may retry (after reconciliation).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transient(_))
    }
}

/// Synchronous request validation failures
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Annotation content was empty after sanitization
    #[error("Annotation content is empty after sanitization")]
    EmptyAnnotation,

    /// Malformed identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Operation requires an active session
    #[error("Session {0} is not active")]
    SessionNotActive(String),

    /// Session is in a final state
    #[error("Session {0} is terminated")]
    SessionTerminated(String),
}

/// Persistence collaborator failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// Referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_classification() {
        assert!(RpcError::Transient("timeout".into()).is_retryable());
        assert!(!RpcError::Terminal("unknown session".into()).is_retryable());
        assert_eq!(
            RpcError::Terminal("x".into()).kind(),
            RpcErrorKind::Terminal
        );
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = GatewayError::from(ConnectionError::Unreachable("10.0.0.9:22".into()));
        assert!(err.to_string().contains("10.0.0.9:22"));
    }
}
