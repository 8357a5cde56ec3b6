//! Outbound SSH connection pool
//!
//! One pooled client connection per enrolled host, keyed by connection
//! id. Callers get connect-or-reuse semantics; a dead handle is replaced
//! transparently on the next open. Nothing here retries: failures are
//! classified and surfaced, retry policy belongs to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use russh::client::{self, AuthResult};
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use tg_core::error::ConnectionError;
use tg_core::types::{AuthMethod, ConnectionId, TerminalConnection};

use crate::connection::credentials::resolve_credential;
use crate::registry::store::ConnectionStore;

/// Connectivity as observed by [`ConnectionManager::health`]. The check
/// never dials; it only inspects the pooled handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Connected,
    Disconnected,
}

/// Verifies the target's host key against the recorded fingerprint.
/// First contact records instead of verifying.
struct OutboundHandler {
    connection_id: ConnectionId,
    expected_fingerprint: Option<String>,
    observed: Arc<std::sync::Mutex<Option<String>>>,
    mismatch: Arc<AtomicBool>,
}

impl client::Handler for OutboundHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key
            .fingerprint(russh::keys::HashAlg::Sha256)
            .to_string();

        if let Some(expected) = &self.expected_fingerprint {
            if expected != &fingerprint {
                tracing::warn!(
                    connection = %self.connection_id,
                    expected,
                    presented = fingerprint,
                    "host key mismatch"
                );
                self.mismatch.store(true, Ordering::SeqCst);
                return Ok(false);
            }
        }

        *self.observed.lock().expect("fingerprint lock") = Some(fingerprint);
        Ok(true)
    }
}

#[derive(Default)]
struct Slot {
    inner: Mutex<Option<client::Handle<OutboundHandler>>>,
}

/// Connect-or-reuse surface the registry depends on.
#[async_trait]
pub trait OutboundPool: Send + Sync {
    /// Ensure a live connection to `id` exists in the pool.
    async fn open(&self, id: &ConnectionId) -> Result<(), ConnectionError>;

    /// Drop the pooled connection for `id`, closing it if live.
    async fn close(&self, id: &ConnectionId);

    /// Connectivity of the pooled handle, with no side effects.
    async fn health(&self, id: &ConnectionId) -> ConnectivityStatus;
}

/// Pool of outbound SSH connections to enrolled hosts.
pub struct ConnectionManager {
    store: Arc<dyn ConnectionStore>,
    pool: DashMap<ConnectionId, Arc<Slot>>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(store: Arc<dyn ConnectionStore>, connect_timeout: Duration) -> Self {
        Self {
            store,
            pool: DashMap::new(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl OutboundPool for ConnectionManager {
    /// Dials when the slot is empty or its handle has died. The per-slot
    /// lock keeps a concurrent close from racing the dial.
    async fn open(&self, id: &ConnectionId) -> Result<(), ConnectionError> {
        let slot = self
            .pool
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Slot::default()))
            .clone();

        let mut guard = slot.inner.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_closed() {
                tracing::debug!(connection = %id, "reusing pooled connection");
                return Ok(());
            }
            tracing::debug!(connection = %id, "pooled connection dead, reconnecting");
        }

        let record = self
            .store
            .get_connection(id)
            .await
            .map_err(|_| ConnectionError::UnknownConnection(id.to_string()))?;

        let handle = self.dial(&record).await?;
        *guard = Some(handle);
        Ok(())
    }

    /// Closing an unknown or already-closed connection is a no-op. The
    /// slot is dropped from the pool so closed ids do not accumulate.
    async fn close(&self, id: &ConnectionId) {
        let Some(slot) = self.pool.get(id).map(|s| Arc::clone(&s)) else {
            return;
        };

        let mut guard = slot.inner.lock().await;
        if let Some(handle) = guard.take() {
            tracing::info!(connection = %id, "closing outbound connection");
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "closing", "en")
                .await;
        }
        self.pool.remove(id);
    }

    async fn health(&self, id: &ConnectionId) -> ConnectivityStatus {
        let Some(slot) = self.pool.get(id).map(|s| Arc::clone(&s)) else {
            return ConnectivityStatus::Disconnected;
        };

        let guard = slot.inner.lock().await;
        match guard.as_ref() {
            Some(handle) if !handle.is_closed() => ConnectivityStatus::Connected,
            _ => ConnectivityStatus::Disconnected,
        }
    }
}

impl ConnectionManager {
    async fn dial(
        &self,
        record: &TerminalConnection,
    ) -> Result<client::Handle<OutboundHandler>, ConnectionError> {
        let addr = format!("{}:{}", record.host, record.port);
        tracing::info!(connection = %record.id, %addr, "dialing target host");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Unreachable(format!("{addr}: connect timed out")))?
            .map_err(|e| ConnectionError::Unreachable(format!("{addr}: {e}")))?;

        let mismatch = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(std::sync::Mutex::new(None));
        let handler = OutboundHandler {
            connection_id: record.id.clone(),
            expected_fingerprint: record.host_key_fingerprint.clone(),
            observed: Arc::clone(&observed),
            mismatch: Arc::clone(&mismatch),
        };

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect_stream(config, stream, handler)
            .await
            .map_err(|e| {
                if mismatch.load(Ordering::SeqCst) {
                    ConnectionError::HostKeyMismatch(record.id.to_string())
                } else {
                    ConnectionError::Unreachable(format!("{addr}: {e}"))
                }
            })?;

        let outcome = match &record.auth {
            AuthMethod::Password { credential_ref } => {
                let password = resolve_credential(credential_ref)?;
                handle
                    .authenticate_password(&record.username, password)
                    .await
            }
            AuthMethod::PublicKey { credential_ref } => {
                let pem = resolve_credential(credential_ref)?;
                let key = decode_secret_key(&pem, None).map_err(|e| {
                    ConnectionError::AuthenticationFailed(format!(
                        "{}: key unparseable: {e}",
                        record.id
                    ))
                })?;
                handle
                    .authenticate_publickey(
                        &record.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), None),
                    )
                    .await
            }
        };

        match outcome {
            Ok(AuthResult::Success) => {}
            Ok(AuthResult::Failure { .. }) => {
                return Err(ConnectionError::AuthenticationFailed(record.id.to_string()));
            }
            Err(e) => {
                return Err(ConnectionError::Closed(format!("{addr}: {e}")));
            }
        }

        // Trust-on-first-use: persist the fingerprint we just saw so the
        // next dial verifies instead of recording.
        if record.host_key_fingerprint.is_none() {
            let seen = observed.lock().expect("fingerprint lock").clone();
            if let Some(fingerprint) = seen {
                let mut updated = record.clone();
                updated.host_key_fingerprint = Some(fingerprint);
                if let Err(e) = self.store.update_connection(updated).await {
                    tracing::warn!(connection = %record.id, "failed to record fingerprint: {e}");
                }
            }
        }

        tracing::info!(connection = %record.id, "outbound connection established");
        Ok(handle)
    }
}
