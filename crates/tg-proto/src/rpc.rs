//! Worker RPC request and response messages
//!
//! Requests and responses are serialized as single JSON lines, one message
//! per line, over the mutually authenticated TLS stream. The gateway always
//! speaks first; every request produces exactly one response.

use serde::{Deserialize, Serialize};

use crate::error::WorkerErrorCode;
use crate::timestamp::Timestamp;

/// Request from gateway to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// List sessions known to the worker, paged.
    ListSessions(ListSessionsRequest),

    /// Start a new tmux-backed session.
    StartSession(StartSessionRequest),

    /// Fetch full detail for one session.
    GetSessionInfo { session_id: String },

    /// Terminate a session.
    TerminateSession { session_id: String },
}

/// Response from worker to gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// Page of sessions.
    Sessions(ListSessionsResponse),

    /// Session started.
    Started(WireSession),

    /// Full session detail.
    SessionInfo(WireSessionDetail),

    /// Session terminated.
    Terminated { session_id: String },

    /// Worker-reported failure.
    Error {
        code: WorkerErrorCode,
        message: String,
    },
}

/// Server-side filter for `ListSessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    /// Restrict to one connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Restrict to sessions in this status ("starting", "active", "terminated").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Paged list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSessionsRequest {
    #[serde(default)]
    pub filter: SessionFilter,
    /// Maximum entries per page; workers may cap this.
    #[serde(default)]
    pub page_size: u32,
    /// Opaque continuation token from a previous response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

/// Paged list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<WireSession>,
    /// Present when more pages remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Parameters for starting a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub connection_id: String,
    /// tmux session name; the worker generates one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session_name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    /// Periodic capture interval in seconds; 0 disables periodic capture.
    #[serde(default)]
    pub capture_interval_s: u32,
    #[serde(default)]
    pub capture_on_command: bool,
    #[serde(default)]
    pub embed_commands: bool,
    #[serde(default)]
    pub embed_scrollback: bool,
}

/// Session summary as reported by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSession {
    pub session_id: String,
    pub connection_id: String,
    pub worker_id: String,
    pub tmux_session_name: String,
    /// "starting", "active" or "terminated".
    pub status: String,
    pub cols: u16,
    pub rows: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Full session detail, including windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSessionDetail {
    #[serde(flatten)]
    pub session: WireSession,
    #[serde(default)]
    pub windows: Vec<WireWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A tmux window within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireWindow {
    pub window_index: u32,
    pub name: String,
    pub is_active: bool,
}
