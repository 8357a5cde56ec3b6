//! Session state machine
//!
//! The registry is the only writer of session, tunnel, and annotation
//! records. Session starts route through the outbound connection pool and
//! the worker RPC client; any failure on that path leaves no record
//! behind. Transitions into `terminated` are final and are announced on a
//! broadcast channel so the tunnel closer can react.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};

use tg_core::error::{GatewayError, RpcError, ValidationError};
use tg_core::events::{EventSink, GatewayEvent};
use tg_core::sanitize::sanitize;
use tg_core::types::{
    Annotation, AnnotationId, AnnotationKind, ConnectionId, SearchEntry, SearchFilters, SessionId,
    SessionParams, SessionStatus, TerminalSession, TerminalWindow, Tunnel, TunnelDirection,
    TunnelId, TunnelStatus,
};
use tg_proto::{from_timestamp, StartSessionRequest, WireSession, WireSessionDetail};

use crate::connection::OutboundPool;
use crate::registry::store::SessionStore;
use crate::worker::WorkerApi;

/// Registry over the durable session/tunnel/annotation state.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    connections: Arc<dyn OutboundPool>,
    worker: Arc<dyn WorkerApi>,
    events: Arc<dyn EventSink>,
    /// Announces ids of sessions that just reached `terminated`.
    terminated_tx: broadcast::Sender<SessionId>,
    /// Per-session locks serializing state transitions.
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
    namespace: String,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        connections: Arc<dyn OutboundPool>,
        worker: Arc<dyn WorkerApi>,
        events: Arc<dyn EventSink>,
        namespace: String,
    ) -> Self {
        let (terminated_tx, _) = broadcast::channel(64);
        Self {
            store,
            connections,
            worker,
            events,
            terminated_tx,
            locks: DashMap::new(),
            namespace,
        }
    }

    /// Subscribe to session-terminated announcements.
    pub fn subscribe_terminated(&self) -> broadcast::Receiver<SessionId> {
        self.terminated_tx.subscribe()
    }

    fn lock_for(&self, id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start a new session over `connection_id`. Both the connection and
    /// the worker call must succeed before anything is persisted.
    pub async fn start(
        &self,
        connection_id: &ConnectionId,
        params: SessionParams,
    ) -> Result<TerminalSession, GatewayError> {
        self.connections.open(connection_id).await?;

        let request = StartSessionRequest {
            connection_id: connection_id.to_string(),
            tmux_session_name: params.tmux_session_name.clone(),
            cols: params.cols,
            rows: params.rows,
            capture_interval_s: params.capture_interval_s,
            capture_on_command: params.capture_on_command,
            embed_commands: params.embed_commands,
            embed_scrollback: params.embed_scrollback,
        };

        let wire = match self.worker.start_session(request).await {
            Ok(wire) => wire,
            Err(e) => {
                self.events.emit(GatewayEvent::RpcFailed {
                    session_id: None,
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
                return Err(e.into());
            }
        };

        let mut session = self.session_from_wire(&wire, &params);
        session.status = SessionStatus::Starting;

        let id = session.id.clone();
        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        self.store.insert_session(session.clone()).await?;

        // The worker has confirmed the start; flip to active unless a
        // concurrent terminate already won.
        let mut current = self.store.get_session(&id).await?;
        if transition(&mut current, SessionStatus::Active) {
            self.store.update_session(current.clone()).await?;
            self.events.emit(GatewayEvent::SessionStatusChanged {
                session_id: id.clone(),
                status: SessionStatus::Active,
            });
        }

        tracing::info!(session = %id, connection = %connection_id, "session started");
        self.store.get_session(&id).await.map_err(Into::into)
    }

    /// Terminate a session. Idempotent for sessions already terminated;
    /// on RPC failure the local record is left untouched and the error is
    /// surfaced for the caller's retry policy.
    pub async fn terminate(&self, session_id: &SessionId) -> Result<(), GatewayError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.store.get_session(session_id).await?;
        if session.status.is_final() {
            tracing::debug!(session = %session_id, "already terminated");
            drop(_guard);
            self.locks.remove(session_id);
            return Ok(());
        }

        if let Err(e) = self.worker.terminate_session(session_id.as_str()).await {
            self.events.emit(GatewayEvent::RpcFailed {
                session_id: Some(session_id.clone()),
                message: e.to_string(),
                retryable: e.is_retryable(),
            });
            return Err(e.into());
        }

        transition(&mut session, SessionStatus::Terminated);
        self.store.update_session(session).await?;

        self.events.emit(GatewayEvent::SessionStatusChanged {
            session_id: session_id.clone(),
            status: SessionStatus::Terminated,
        });
        let _ = self.terminated_tx.send(session_id.clone());

        drop(_guard);
        self.locks.remove(session_id);

        tracing::info!(session = %session_id, "session terminated");
        Ok(())
    }

    /// Local read, no worker round trip.
    pub async fn get(&self, session_id: &SessionId) -> Result<TerminalSession, GatewayError> {
        self.store.get_session(session_id).await.map_err(Into::into)
    }

    pub async fn list(&self) -> Result<Vec<TerminalSession>, GatewayError> {
        self.store.list_sessions().await.map_err(Into::into)
    }

    /// Pull the worker's view of a session and fold it into the local
    /// record. A worker that no longer knows the session marks the local
    /// record terminated. This is the reconciliation step callers run
    /// after a timed-out mutating call.
    pub async fn reconcile(&self, session_id: &SessionId) -> Result<TerminalSession, GatewayError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.store.get_session(session_id).await?;

        match self.worker.get_session_info(session_id.as_str()).await {
            Ok(detail) => {
                apply_wire_detail(&mut session, &detail);
                self.store.update_session(session.clone()).await?;
                Ok(session)
            }
            Err(RpcError::Terminal(message)) => {
                tracing::warn!(session = %session_id, message, "worker does not know session");
                if transition(&mut session, SessionStatus::Terminated) {
                    session.error_message = Some(message);
                    self.store.update_session(session.clone()).await?;
                    self.events.emit(GatewayEvent::SessionStatusChanged {
                        session_id: session_id.clone(),
                        status: SessionStatus::Terminated,
                    });
                    let _ = self.terminated_tx.send(session_id.clone());
                    drop(_guard);
                    self.locks.remove(session_id);
                }
                Ok(session)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append a free-text annotation. Content is sanitized first; content
    /// that sanitizes to nothing is rejected.
    pub async fn annotate(
        &self,
        session_id: &SessionId,
        content: &str,
        tags: Vec<String>,
    ) -> Result<Annotation, GatewayError> {
        // Annotating requires the session to exist, in any state.
        self.store.get_session(session_id).await?;

        let clean = sanitize(content);
        if clean.is_empty() {
            return Err(ValidationError::EmptyAnnotation.into());
        }

        let annotation = Annotation {
            id: AnnotationId::generate(),
            session_id: session_id.clone(),
            kind: AnnotationKind::Annotation,
            content: clean,
            tags,
            captured_at: Utc::now(),
        };

        self.store.insert_annotation(annotation.clone()).await?;
        Ok(annotation)
    }

    /// Ranked annotation search; an empty result set is a normal outcome.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchEntry>, GatewayError> {
        self.store
            .search_annotations(query, filters)
            .await
            .map_err(Into::into)
    }

    /// Open a tunnel against an active session.
    pub async fn create_tunnel(
        &self,
        session_id: &SessionId,
        direction: TunnelDirection,
        local_endpoint: String,
        remote_endpoint: String,
    ) -> Result<Tunnel, GatewayError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let session = self.store.get_session(session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(ValidationError::SessionNotActive(session_id.to_string()).into());
        }

        let tunnel = Tunnel {
            id: TunnelId::generate(),
            session_id: session_id.clone(),
            direction,
            local_endpoint,
            remote_endpoint,
            status: TunnelStatus::Open,
            created_at: Utc::now(),
            closed_at: None,
        };

        self.store.insert_tunnel(tunnel.clone()).await?;
        self.events.emit(GatewayEvent::TunnelOpened {
            tunnel_id: tunnel.id.clone(),
            session_id: session_id.clone(),
        });

        tracing::info!(tunnel = %tunnel.id, session = %session_id, "tunnel opened");
        Ok(tunnel)
    }

    /// Close a tunnel. Closing an already-closed tunnel is a no-op.
    pub async fn close_tunnel(&self, tunnel_id: &TunnelId) -> Result<(), GatewayError> {
        let mut tunnel = self.store.get_tunnel(tunnel_id).await?;
        if tunnel.status == TunnelStatus::Closed {
            return Ok(());
        }

        tunnel.status = TunnelStatus::Closed;
        tunnel.closed_at = Some(Utc::now());
        let session_id = tunnel.session_id.clone();
        self.store.update_tunnel(tunnel).await?;

        self.events.emit(GatewayEvent::TunnelClosed {
            tunnel_id: tunnel_id.clone(),
            session_id,
        });
        tracing::info!(tunnel = %tunnel_id, "tunnel closed");
        Ok(())
    }

    /// Close every open tunnel bound to `session_id`. Used by the tunnel
    /// closer when a session terminates.
    pub async fn close_tunnels_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<usize, GatewayError> {
        let tunnels = self.store.tunnels_for_session(session_id).await?;
        let mut closed = 0;
        for tunnel in tunnels {
            if tunnel.status == TunnelStatus::Open {
                self.close_tunnel(&tunnel.id).await?;
                closed += 1;
            }
        }
        Ok(closed)
    }

    fn session_from_wire(&self, wire: &WireSession, params: &SessionParams) -> TerminalSession {
        let now = Utc::now();
        TerminalSession {
            id: SessionId::new(&wire.session_id),
            namespace: params
                .namespace
                .clone()
                .unwrap_or_else(|| self.namespace.clone()),
            connection_id: ConnectionId::new(&wire.connection_id),
            tmux_session_name: wire.tmux_session_name.clone(),
            worker_id: tg_core::types::WorkerId::new(&wire.worker_id),
            status: SessionStatus::from_str(&wire.status).unwrap_or(SessionStatus::Starting),
            cols: wire.cols,
            rows: wire.rows,
            capture_interval_s: params.capture_interval_s,
            capture_on_command: params.capture_on_command,
            embed_commands: params.embed_commands,
            embed_scrollback: params.embed_scrollback,
            started_at: from_timestamp(wire.started_at.as_ref()),
            last_activity_at: from_timestamp(wire.last_activity_at.as_ref()),
            terminated_at: from_timestamp(wire.terminated_at.as_ref()),
            exit_code: wire.exit_code,
            error_message: None,
            tags: params.tags.clone(),
            notes: params.notes.clone(),
            created_at: now,
            updated_at: now,
            windows: Vec::new(),
        }
    }
}

/// Apply a status transition, refusing to leave a final state. Returns
/// whether anything changed.
fn transition(session: &mut TerminalSession, to: SessionStatus) -> bool {
    if session.status.is_final() || session.status == to {
        return false;
    }

    session.status = to;
    session.updated_at = Utc::now();
    if to == SessionStatus::Terminated {
        session.terminated_at = Some(Utc::now());
    }
    true
}

/// Where a status sits in the lifecycle; reconciliation only ever moves
/// a session forward.
fn status_rank(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Starting => 0,
        SessionStatus::Active => 1,
        SessionStatus::Terminated => 2,
    }
}

/// Fold the worker's detail view into the local record. Local-only fields
/// (tags, notes, namespace) are preserved, and a stale worker view never
/// moves the session backward or erases a known activity time.
fn apply_wire_detail(session: &mut TerminalSession, detail: &WireSessionDetail) {
    let wire = &detail.session;

    if let Ok(status) = SessionStatus::from_str(&wire.status) {
        if status_rank(status) > status_rank(session.status) {
            transition(session, status);
        }
    }
    if let Some(at) = from_timestamp(wire.last_activity_at.as_ref()) {
        session.last_activity_at = Some(at);
    }
    if session.terminated_at.is_none() {
        session.terminated_at = from_timestamp(wire.terminated_at.as_ref());
    }
    session.exit_code = wire.exit_code;
    if detail.error_message.is_some() {
        session.error_message = detail.error_message.clone();
    }
    session.windows = detail
        .windows
        .iter()
        .map(|w| TerminalWindow {
            id: format!("{}:{}", session.id, w.window_index),
            session_id: session.id.clone(),
            window_index: w.window_index,
            name: w.name.clone(),
            is_active: w.is_active,
        })
        .collect();
    session.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tg_core::error::ConnectionError;
    use tg_core::events::TracingSink;
    use tg_proto::{ListSessionsRequest, ListSessionsResponse};

    use crate::connection::ConnectivityStatus;
    use crate::registry::store::MemoryStore;

    struct AlwaysUpPool;

    #[async_trait]
    impl OutboundPool for AlwaysUpPool {
        async fn open(&self, _id: &ConnectionId) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn close(&self, _id: &ConnectionId) {}

        async fn health(&self, _id: &ConnectionId) -> ConnectivityStatus {
            ConnectivityStatus::Connected
        }
    }

    struct ObedientWorker;

    #[async_trait]
    impl WorkerApi for ObedientWorker {
        async fn list_sessions(
            &self,
            _request: ListSessionsRequest,
        ) -> Result<ListSessionsResponse, RpcError> {
            Ok(ListSessionsResponse {
                sessions: Vec::new(),
                next_page_token: None,
            })
        }

        async fn start_session(
            &self,
            request: StartSessionRequest,
        ) -> Result<WireSession, RpcError> {
            Ok(WireSession {
                session_id: SessionId::generate().to_string(),
                connection_id: request.connection_id,
                worker_id: "worker-1".to_string(),
                tmux_session_name: request
                    .tmux_session_name
                    .unwrap_or_else(|| "tg-0".to_string()),
                status: "starting".to_string(),
                cols: request.cols,
                rows: request.rows,
                started_at: None,
                last_activity_at: None,
                terminated_at: None,
                exit_code: None,
            })
        }

        async fn get_session_info(&self, session_id: &str) -> Result<WireSessionDetail, RpcError> {
            Err(RpcError::Terminal(format!("unknown session {session_id}")))
        }

        async fn terminate_session(&self, _session_id: &str) -> Result<(), RpcError> {
            Ok(())
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AlwaysUpPool),
            Arc::new(ObedientWorker),
            Arc::new(TracingSink),
            "default".to_string(),
        )
    }

    #[tokio::test]
    async fn test_terminate_evicts_session_lock() {
        let registry = registry();
        let session = registry
            .start(&ConnectionId::generate(), SessionParams::default())
            .await
            .unwrap();
        assert!(!registry.locks.is_empty());

        registry.terminate(&session.id).await.unwrap();
        assert!(registry.locks.is_empty());

        // Repeat terminations stay clean too.
        registry.terminate(&session.id).await.unwrap();
        assert!(registry.locks.is_empty());
    }

    fn base_session(status: SessionStatus) -> TerminalSession {
        let now = Utc::now();
        TerminalSession {
            id: SessionId::generate(),
            namespace: "default".to_string(),
            connection_id: ConnectionId::generate(),
            tmux_session_name: "main".to_string(),
            worker_id: tg_core::types::WorkerId::generate(),
            status,
            cols: 80,
            rows: 24,
            capture_interval_s: 0,
            capture_on_command: false,
            embed_commands: false,
            embed_scrollback: false,
            started_at: Some(now),
            last_activity_at: None,
            terminated_at: None,
            exit_code: None,
            error_message: None,
            tags: Vec::new(),
            notes: None,
            created_at: now,
            updated_at: now,
            windows: Vec::new(),
        }
    }

    #[test]
    fn test_transition_sets_terminated_at() {
        let mut session = base_session(SessionStatus::Active);
        assert!(transition(&mut session, SessionStatus::Terminated));
        assert_eq!(session.status, SessionStatus::Terminated);
        assert!(session.terminated_at.is_some());
    }

    #[test]
    fn test_terminated_is_final() {
        let mut session = base_session(SessionStatus::Terminated);
        assert!(!transition(&mut session, SessionStatus::Active));
        assert_eq!(session.status, SessionStatus::Terminated);
    }

    #[test]
    fn test_transition_to_same_status_is_noop() {
        let mut session = base_session(SessionStatus::Active);
        assert!(!transition(&mut session, SessionStatus::Active));
    }

    fn detail_for(session: &TerminalSession, status: &str) -> WireSessionDetail {
        WireSessionDetail {
            session: WireSession {
                session_id: session.id.to_string(),
                connection_id: session.connection_id.to_string(),
                worker_id: session.worker_id.to_string(),
                tmux_session_name: session.tmux_session_name.clone(),
                status: status.to_string(),
                cols: session.cols,
                rows: session.rows,
                started_at: None,
                last_activity_at: None,
                terminated_at: None,
                exit_code: None,
            },
            windows: Vec::new(),
            error_message: None,
        }
    }

    #[test]
    fn test_stale_worker_report_does_not_regress_status() {
        let mut session = base_session(SessionStatus::Active);
        let detail = detail_for(&session, "starting");
        apply_wire_detail(&mut session, &detail);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn test_missing_activity_time_is_preserved() {
        let mut session = base_session(SessionStatus::Active);
        session.last_activity_at = Some(Utc::now());

        let detail = detail_for(&session, "active");
        apply_wire_detail(&mut session, &detail);
        assert!(session.last_activity_at.is_some());
    }
}
