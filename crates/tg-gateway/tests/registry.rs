//! End-to-end registry scenarios against a scripted worker and pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use tg_core::error::{ConnectionError, GatewayError, RpcError};
use tg_core::events::{ChannelSink, GatewayEvent};
use tg_core::types::{
    ConnectionId, SearchFilters, SessionId, SessionParams, SessionStatus, TunnelDirection,
    TunnelStatus,
};
use tg_proto::{
    ListSessionsRequest, ListSessionsResponse, StartSessionRequest, WireSession,
    WireSessionDetail, to_timestamp,
};

use tg_gateway::connection::{ConnectivityStatus, OutboundPool};
use tg_gateway::registry::{
    spawn_tunnel_closer, MemoryStore, SessionRegistry, SessionStore,
};
use tg_gateway::worker::WorkerApi;

/// Pool stub: either always connects or always refuses.
struct StubPool {
    reachable: bool,
}

#[async_trait]
impl OutboundPool for StubPool {
    async fn open(&self, id: &ConnectionId) -> Result<(), ConnectionError> {
        if self.reachable {
            Ok(())
        } else {
            Err(ConnectionError::Unreachable(format!("{id}: refused")))
        }
    }

    async fn close(&self, _id: &ConnectionId) {}

    async fn health(&self, _id: &ConnectionId) -> ConnectivityStatus {
        if self.reachable {
            ConnectivityStatus::Connected
        } else {
            ConnectivityStatus::Disconnected
        }
    }
}

/// Worker stub with scripted terminate behavior.
struct ScriptedWorker {
    terminate_error: Option<fn() -> RpcError>,
    terminate_calls: AtomicUsize,
}

impl ScriptedWorker {
    fn healthy() -> Self {
        Self {
            terminate_error: None,
            terminate_calls: AtomicUsize::new(0),
        }
    }

    fn reports_not_found() -> Self {
        Self {
            terminate_error: Some(|| RpcError::Terminal("unknown session".to_string())),
            terminate_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WorkerApi for ScriptedWorker {
    async fn list_sessions(
        &self,
        _request: ListSessionsRequest,
    ) -> Result<ListSessionsResponse, RpcError> {
        Ok(ListSessionsResponse {
            sessions: Vec::new(),
            next_page_token: None,
        })
    }

    async fn start_session(&self, request: StartSessionRequest) -> Result<WireSession, RpcError> {
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
            started_at: to_timestamp(Some(chrono::Utc::now())),
            last_activity_at: None,
            terminated_at: None,
            exit_code: None,
        })
    }

    async fn get_session_info(&self, session_id: &str) -> Result<WireSessionDetail, RpcError> {
        Err(RpcError::Terminal(format!("unknown session {session_id}")))
    }

    async fn terminate_session(&self, _session_id: &str) -> Result<(), RpcError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        match &self.terminate_error {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

struct Harness {
    registry: Arc<SessionRegistry>,
    store: Arc<MemoryStore>,
    worker: Arc<ScriptedWorker>,
    events: tokio::sync::mpsc::UnboundedReceiver<GatewayEvent>,
}

fn harness(reachable: bool, worker: ScriptedWorker) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let worker = Arc::new(worker);
    let (sink, events) = ChannelSink::new();

    let registry = Arc::new(SessionRegistry::new(
        store.clone(),
        Arc::new(StubPool { reachable }),
        worker.clone(),
        Arc::new(sink),
        "default".to_string(),
    ));

    Harness {
        registry,
        store,
        worker,
        events,
    }
}

fn params() -> SessionParams {
    SessionParams {
        cols: 120,
        rows: 40,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_start_creates_active_session() {
    let h = harness(true, ScriptedWorker::healthy());

    let session = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.cols, 120);

    let stored = h.store.get_session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Active);
}

#[tokio::test]
async fn test_unreachable_host_leaves_no_record() {
    let h = harness(false, ScriptedWorker::healthy());

    let err = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Connection(ConnectionError::Unreachable(_))
    ));
    assert!(h.store.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminate_closes_session_and_tunnels() {
    let h = harness(true, ScriptedWorker::healthy());
    let cancel = tokio_util::sync::CancellationToken::new();
    let closer = spawn_tunnel_closer(h.registry.clone(), cancel.clone());

    let session = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();
    let tunnel = h
        .registry
        .create_tunnel(
            &session.id,
            TunnelDirection::Local,
            "127.0.0.1:8080".to_string(),
            "127.0.0.1:80".to_string(),
        )
        .await
        .unwrap();

    h.registry.terminate(&session.id).await.unwrap();

    let stored = h.store.get_session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Terminated);
    assert!(stored.terminated_at.is_some());

    // The closer consumes the termination broadcast asynchronously.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        let stored = h.store.get_tunnel(&tunnel.id).await.unwrap();
        if stored.status == TunnelStatus::Closed {
            assert!(stored.closed_at.is_some());
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tunnel never closed"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    cancel.cancel();
    let _ = closer.await;
}

#[tokio::test]
async fn test_worker_not_found_leaves_state_untouched() {
    let h = harness(true, ScriptedWorker::reports_not_found());

    let session = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();

    let err = h.registry.terminate(&session.id).await.unwrap_err();
    match err {
        GatewayError::Rpc(rpc) => assert!(!rpc.is_retryable()),
        other => panic!("expected rpc error, got {other}"),
    }

    let stored = h.store.get_session(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Active);
    assert!(stored.terminated_at.is_none());
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let h = harness(true, ScriptedWorker::healthy());

    let session = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();

    h.registry.terminate(&session.id).await.unwrap();
    h.registry.terminate(&session.id).await.unwrap();

    // The second call short-circuits before the worker.
    assert_eq!(h.worker.terminate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_annotation_is_sanitized() {
    let h = harness(true, ScriptedWorker::healthy());
    let session = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();

    let annotation = h
        .registry
        .annotate(&session.id, "<script>alert(1)</script>Deployed", Vec::new())
        .await
        .unwrap();
    assert_eq!(annotation.content, "Deployed");

    let err = h
        .registry
        .annotate(&session.id, "<script>only()</script>", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn test_search_scopes_to_session() {
    let h = harness(true, ScriptedWorker::healthy());
    let first = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();
    let second = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();

    h.registry
        .annotate(&first.id, "release went out clean", vec!["release".to_string()])
        .await
        .unwrap();
    h.registry
        .annotate(&second.id, "release rolled back", Vec::new())
        .await
        .unwrap();

    let filters = SearchFilters {
        session_id: Some(first.id.clone()),
        ..Default::default()
    };
    let results = h.registry.search("release", &filters).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].annotation.session_id, first.id);

    let none = h
        .registry
        .search("nonexistent-term", &SearchFilters::default())
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_tunnel_requires_active_session() {
    let h = harness(true, ScriptedWorker::healthy());
    let session = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();

    h.registry.terminate(&session.id).await.unwrap();

    let err = h
        .registry
        .create_tunnel(
            &session.id,
            TunnelDirection::Remote,
            "127.0.0.1:9090".to_string(),
            "127.0.0.1:90".to_string(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn test_reconcile_marks_unknown_sessions_terminated() {
    let mut h = harness(true, ScriptedWorker::healthy());
    let session = h
        .registry
        .start(&ConnectionId::generate(), params())
        .await
        .unwrap();

    // Drain start events so the assertion below sees the reconcile one.
    while h.events.try_recv().is_ok() {}

    // The scripted worker answers get_session_info with "unknown".
    let reconciled = h.registry.reconcile(&session.id).await.unwrap();
    assert_eq!(reconciled.status, SessionStatus::Terminated);
    assert!(reconciled.error_message.is_some());

    let event = h.events.try_recv().unwrap();
    assert!(matches!(
        event,
        GatewayEvent::SessionStatusChanged {
            status: SessionStatus::Terminated,
            ..
        }
    ));
}
