//! Error codes carried on the worker RPC wire

use serde::{Deserialize, Serialize};

/// Error codes a worker may report in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorCode {
    /// Unknown error
    Unknown,
    /// The referenced session does not exist on the worker
    SessionNotFound,
    /// tmux refused or failed to spawn the session
    SpawnFailed,
    /// Request was malformed
    InvalidRequest,
    /// Worker is shutting down or overloaded
    Unavailable,
}

/// Whether a failed RPC may be retried by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Network trouble or timeout - the caller may retry with backoff,
    /// but must reconcile first since the call may have taken effect.
    Transient,
    /// The worker definitively rejected the request - retrying is pointless
    /// and the caller must reconcile local state instead.
    Terminal,
}

impl WorkerErrorCode {
    /// Classify a worker-reported error for the caller's retry policy.
    pub fn kind(&self) -> RpcErrorKind {
        match self {
            WorkerErrorCode::SessionNotFound
            | WorkerErrorCode::SpawnFailed
            | WorkerErrorCode::InvalidRequest => RpcErrorKind::Terminal,
            WorkerErrorCode::Unknown | WorkerErrorCode::Unavailable => RpcErrorKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_is_terminal() {
        assert_eq!(
            WorkerErrorCode::SessionNotFound.kind(),
            RpcErrorKind::Terminal
        );
    }

    #[test]
    fn test_unavailable_is_transient() {
        assert_eq!(WorkerErrorCode::Unavailable.kind(), RpcErrorKind::Transient);
    }

    #[test]
    fn test_code_serialization() {
        let json = serde_json::to_string(&WorkerErrorCode::SessionNotFound).unwrap();
        assert_eq!(json, "\"session_not_found\"");
    }
}
