//! Core domain types
//!
//! Durable shapes for connections, sessions, windows, tunnels and captured
//! content. The registry owns sessions/windows/tunnels/annotations; live
//! connection handles belong to the outbound manager and only the metadata
//! here is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh random identifier
            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, uuid::Uuid::new_v4()))
            }

            /// Get the raw ID string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a registered remote host
    ConnectionId,
    "conn"
);
string_id!(
    /// Unique identifier for a terminal session
    SessionId,
    "sess"
);
string_id!(
    /// Unique identifier for a tunnel
    TunnelId,
    "tun"
);
string_id!(
    /// Unique identifier for a per-host worker process
    WorkerId,
    "worker"
);
string_id!(
    /// Unique identifier for an annotation or capture entry
    AnnotationId,
    "note"
);

/// Session lifecycle status. `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Start request accepted, worker still spinning up tmux
    Starting,
    /// Session is live
    Active,
    /// Session has ended; no further transitions
    Terminated,
}

impl SessionStatus {
    /// Whether this status admits no further transitions.
    pub fn is_final(&self) -> bool {
        matches!(self, SessionStatus::Terminated)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(SessionStatus::Starting),
            "active" => Ok(SessionStatus::Active),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Registered remote host status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRecordStatus {
    /// Enrolled and believed reachable
    Enrolled,
    /// Administratively disabled
    Disabled,
}

/// How the outbound manager authenticates to a target host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password resolved from a credential reference
    Password { credential_ref: String },
    /// Private key resolved from a credential reference
    PublicKey { credential_ref: String },
}

/// A registered remote host, created by successful enrollment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConnection {
    pub id: ConnectionId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    /// SHA256 fingerprint of the host's key, recorded on first contact.
    /// `None` means trust-on-first-use.
    pub host_key_fingerprint: Option<String>,
    pub status: ConnectionRecordStatus,
    pub created_at: DateTime<Utc>,
}

/// A tmux window within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalWindow {
    pub id: String,
    pub session_id: SessionId,
    pub window_index: u32,
    pub name: String,
    pub is_active: bool,
}

/// A tmux-backed terminal session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSession {
    pub id: SessionId,
    pub namespace: String,
    pub connection_id: ConnectionId,
    pub tmux_session_name: String,
    pub worker_id: WorkerId,
    pub status: SessionStatus,
    pub cols: u16,
    pub rows: u16,
    pub capture_interval_s: u32,
    pub capture_on_command: bool,
    pub embed_commands: bool,
    pub embed_scrollback: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub windows: Vec<TerminalWindow>,
}

/// Caller-facing parameters for starting a session
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    pub namespace: Option<String>,
    pub tmux_session_name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub capture_interval_s: u32,
    pub capture_on_command: bool,
    pub embed_commands: bool,
    pub embed_scrollback: bool,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

/// Tunnel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelDirection {
    /// Local listen endpoint forwarded to the remote side
    Local,
    /// Remote listen endpoint forwarded back to the gateway side
    Remote,
}

/// Tunnel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    Open,
    Closed,
}

/// A forwarded endpoint bound to a session's lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: TunnelId,
    pub session_id: SessionId,
    pub direction: TunnelDirection,
    /// `host:port` on the gateway side
    pub local_endpoint: String,
    /// `host:port` on the target side
    pub remote_endpoint: String,
    pub status: TunnelStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Kind of captured content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// A command the user ran
    Command,
    /// Captured terminal output
    Output,
    /// Free-text note attached by a caller
    Annotation,
}

/// Append-only captured content or note; never mutated after capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub session_id: SessionId,
    pub kind: AnnotationKind,
    pub content: String,
    pub tags: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

/// An annotation plus its relevance score when produced by search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEntry {
    #[serde(flatten)]
    pub annotation: Annotation,
    /// Similarity score in [0, 1]; only meaningful within one result set
    pub score: f32,
}

/// Filters applied to annotation search
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub connection_id: Option<ConnectionId>,
    pub session_id: Option<SessionId>,
    pub kind: Option<AnnotationKind>,
    pub tag: Option<String>,
    pub host: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}
