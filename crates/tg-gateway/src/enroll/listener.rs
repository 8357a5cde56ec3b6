//! Enrollment SSH listener
//!
//! Accepts inbound connections from unregistered hosts and runs one
//! [`EnrollHandler`](crate::enroll::handler::EnrollHandler) per stream.
//! Locked-out addresses are dropped here, before any key exchange.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use tg_core::events::GatewayEvent;

use crate::enroll::handler::EnrollHandler;
use crate::state::GatewayState;
use crate::trust::hostkey::{self, KeyMaterial};

/// SSH server that enrolls new hosts.
pub struct EnrollServer {
    /// russh server configuration, shared by all connections
    config: Arc<russh::server::Config>,
    /// Shared gateway state
    state: Arc<GatewayState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl EnrollServer {
    /// Build a server around the given host key. Whichever algorithm the
    /// key carries is used as-is.
    pub fn new(
        host_key: &KeyMaterial,
        state: Arc<GatewayState>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let key = hostkey::parse_key_material(host_key).context("host key unusable")?;

        let mut config = russh::server::Config::default();
        config.keys.push(key);
        config.auth_rejection_time = std::time::Duration::from_secs(1);
        config.auth_rejection_time_initial = Some(std::time::Duration::from_secs(0));

        Ok(Self {
            config: Arc::new(config),
            state,
            cancel,
        })
    }

    /// Bind the listening socket without starting to accept.
    pub async fn bind(&self, bind_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind to {bind_addr}"))?;
        tracing::info!("enrollment server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("enrollment server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Bind and serve in one call.
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = self.bind(bind_addr).await?;
        self.serve(listener).await
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let peer_ip = peer_addr.ip();

        // Locked-out peers never reach key exchange.
        if self.state.limiter.is_rate_limited(peer_ip) {
            tracing::warn!(peer = %peer_ip, "dropping connection from rate-limited address");
            self.state.events.emit(GatewayEvent::EnrollmentRejected {
                peer: peer_ip,
                reason: "rate limited".to_string(),
            });
            drop(socket);
            return;
        }

        tracing::debug!(peer = %peer_addr, "new enrollment connection");

        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let handler = EnrollHandler::new(state, peer_addr);

            // run_stream completes key exchange; the returned session
            // future runs the connection to its end.
            let session = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(peer = %peer_addr, "connection handler cancelled");
                    return;
                }
                result = russh::server::run_stream(config, socket, handler) => match result {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::debug!(peer = %peer_addr, "handshake failed: {e}");
                        return;
                    }
                },
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(peer = %peer_addr, "connection cancelled");
                    return;
                }
                result = session => result,
            };

            match result {
                Ok(_) => tracing::debug!(peer = %peer_addr, "connection closed"),
                Err(e) => tracing::debug!(peer = %peer_addr, "connection closed with error: {e}"),
            }
        });
    }
}
