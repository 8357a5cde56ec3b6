//! Tunnel closer
//!
//! Session termination and tunnel closure are coupled through the
//! registry's terminated broadcast rather than inline calls, so the
//! session state machine never reaches into tunnel bookkeeping directly.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::sessions::SessionRegistry;

/// Spawn the background task that closes tunnels of terminated sessions.
pub fn spawn_tunnel_closer(
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut terminated = registry.subscribe_terminated();

    tokio::spawn(async move {
        tracing::debug!("tunnel closer running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("tunnel closer shutting down");
                    break;
                }

                received = terminated.recv() => {
                    match received {
                        Ok(session_id) => {
                            match registry.close_tunnels_for_session(&session_id).await {
                                Ok(0) => {}
                                Ok(n) => {
                                    tracing::info!(session = %session_id, closed = n, "closed tunnels for terminated session");
                                }
                                Err(e) => {
                                    tracing::error!(session = %session_id, "failed to close tunnels: {e}");
                                }
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "tunnel closer lagged behind terminations");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    })
}
