//! Typed client for per-host worker processes
//!
//! Each call opens a mutually authenticated TLS stream to the worker,
//! writes one JSON-line request, and reads one JSON-line response. The
//! whole exchange runs under the configured timeout; a timeout is
//! transient and the caller must reconcile with `list_sessions` or
//! `get_session_info` before retrying a mutating call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use tg_core::error::{KeyMaterialError, RpcError};
use tg_proto::{
    ListSessionsRequest, ListSessionsResponse, RpcErrorKind, StartSessionRequest, WireSession,
    WireSessionDetail, WorkerRequest, WorkerResponse,
};

/// The common name every worker certificate carries; TLS verification is
/// pinned to it.
const WORKER_SERVER_NAME: &str = "termgate-worker";

/// Operations the gateway drives on a worker.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn list_sessions(
        &self,
        request: ListSessionsRequest,
    ) -> Result<ListSessionsResponse, RpcError>;

    async fn start_session(&self, request: StartSessionRequest) -> Result<WireSession, RpcError>;

    async fn get_session_info(&self, session_id: &str) -> Result<WireSessionDetail, RpcError>;

    async fn terminate_session(&self, session_id: &str) -> Result<(), RpcError>;
}

/// mTLS JSON-line client for one worker endpoint.
pub struct WorkerClient {
    addr: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    timeout: Duration,
}

impl WorkerClient {
    pub fn new(
        addr: String,
        tls_config: Arc<ClientConfig>,
        timeout: Duration,
    ) -> Result<Self, KeyMaterialError> {
        let server_name = ServerName::try_from(WORKER_SERVER_NAME)
            .map_err(|e| KeyMaterialError::Parse(format!("worker server name: {e}")))?;

        Ok(Self {
            addr,
            server_name,
            connector: TlsConnector::from(tls_config),
            timeout,
        })
    }

    async fn call(&self, request: &WorkerRequest) -> Result<WorkerResponse, RpcError> {
        let exchange = self.exchange(request);
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Transient(format!(
                "worker {} did not respond within {:?}",
                self.addr, self.timeout
            ))),
        }
    }

    async fn exchange(&self, request: &WorkerRequest) -> Result<WorkerResponse, RpcError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| RpcError::Transient(format!("worker {}: {e}", self.addr)))?;

        let tls = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| RpcError::Transient(format!("worker {} tls: {e}", self.addr)))?;

        let mut tls = BufReader::new(tls);

        let mut line = serde_json::to_string(request)
            .map_err(|e| RpcError::Terminal(format!("request encode: {e}")))?;
        line.push('\n');
        tls.get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RpcError::Transient(format!("worker {}: {e}", self.addr)))?;
        tls.get_mut()
            .flush()
            .await
            .map_err(|e| RpcError::Transient(format!("worker {}: {e}", self.addr)))?;

        let mut response_line = String::new();
        let read = tls
            .read_line(&mut response_line)
            .await
            .map_err(|e| RpcError::Transient(format!("worker {}: {e}", self.addr)))?;
        if read == 0 {
            return Err(RpcError::Transient(format!(
                "worker {} closed the stream",
                self.addr
            )));
        }

        let response: WorkerResponse = serde_json::from_str(response_line.trim())
            .map_err(|e| RpcError::Terminal(format!("response decode: {e}")))?;

        match response {
            WorkerResponse::Error { code, message } => {
                tracing::warn!(worker = %self.addr, ?code, message, "worker reported error");
                match code.kind() {
                    RpcErrorKind::Transient => Err(RpcError::Transient(message)),
                    RpcErrorKind::Terminal => Err(RpcError::Terminal(message)),
                }
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl WorkerApi for WorkerClient {
    async fn list_sessions(
        &self,
        request: ListSessionsRequest,
    ) -> Result<ListSessionsResponse, RpcError> {
        match self.call(&WorkerRequest::ListSessions(request)).await? {
            WorkerResponse::Sessions(response) => Ok(response),
            other => Err(unexpected("sessions", &other)),
        }
    }

    async fn start_session(&self, request: StartSessionRequest) -> Result<WireSession, RpcError> {
        match self.call(&WorkerRequest::StartSession(request)).await? {
            WorkerResponse::Started(session) => Ok(session),
            other => Err(unexpected("started", &other)),
        }
    }

    async fn get_session_info(&self, session_id: &str) -> Result<WireSessionDetail, RpcError> {
        let request = WorkerRequest::GetSessionInfo {
            session_id: session_id.to_string(),
        };
        match self.call(&request).await? {
            WorkerResponse::SessionInfo(detail) => Ok(detail),
            other => Err(unexpected("session_info", &other)),
        }
    }

    async fn terminate_session(&self, session_id: &str) -> Result<(), RpcError> {
        let request = WorkerRequest::TerminateSession {
            session_id: session_id.to_string(),
        };
        match self.call(&request).await? {
            WorkerResponse::Terminated { .. } => Ok(()),
            other => Err(unexpected("terminated", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &WorkerResponse) -> RpcError {
    RpcError::Terminal(format!("expected {wanted} response, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::generate_certificate_bundle;
    use crate::worker::tls::client_tls_config;

    async fn client_with_timeout(addr: &str, timeout: Duration) -> WorkerClient {
        let dir = tempfile::tempdir().unwrap();
        let bundle = generate_certificate_bundle(dir.path()).unwrap();
        let config = client_tls_config(&bundle).unwrap();
        WorkerClient::new(addr.to_string(), config, timeout).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_transient() {
        let client = client_with_timeout("127.0.0.1:1", Duration::from_secs(2)).await;
        let err = client
            .list_sessions(ListSessionsRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_silent_worker_times_out_as_transient() {
        // A listener that accepts and never speaks TLS.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _socket = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client =
            client_with_timeout(&addr.to_string(), Duration::from_millis(200)).await;
        let err = client.terminate_session("sess-x").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
