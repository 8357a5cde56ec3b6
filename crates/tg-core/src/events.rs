//! Lifecycle event emission
//!
//! Session, tunnel and enrollment state changes are published through an
//! `EventSink` so the external API/UI can observe them. The gateway never
//! silently drops an error: every rejected enrollment attempt and every
//! terminal RPC error passes through here.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, SessionId, SessionStatus, TunnelId};

/// Lifecycle events published to the external observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A host enrolled successfully and a connection record was created
    EnrollmentAccepted {
        connection_id: ConnectionId,
        peer: IpAddr,
    },

    /// An enrollment attempt was rejected
    EnrollmentRejected { peer: IpAddr, reason: String },

    /// A session changed status
    SessionStatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },

    /// A tunnel was opened against an active session
    TunnelOpened {
        tunnel_id: TunnelId,
        session_id: SessionId,
    },

    /// A tunnel was closed, explicitly or by session termination
    TunnelClosed {
        tunnel_id: TunnelId,
        session_id: SessionId,
    },

    /// A worker RPC failed terminally
    RpcFailed {
        session_id: Option<SessionId>,
        message: String,
        retryable: bool,
    },
}

/// Destination for lifecycle events.
pub trait EventSink: Send + Sync {
    /// Publish one event. Emission must never block the caller for long
    /// and must never fail the operation that produced the event.
    fn emit(&self, event: GatewayEvent);
}

/// Sink that logs events through `tracing`; the default when no external
/// observer is attached.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: GatewayEvent) {
        match &event {
            GatewayEvent::EnrollmentRejected { peer, reason } => {
                tracing::warn!(%peer, reason, "enrollment rejected");
            }
            GatewayEvent::RpcFailed {
                session_id,
                message,
                retryable,
            } => {
                tracing::warn!(?session_id, message, retryable, "worker rpc failed");
            }
            other => {
                tracing::info!(event = ?other, "gateway event");
            }
        }
    }
}

/// Sink that forwards events over an unbounded channel to an external
/// consumer (the API layer).
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<GatewayEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving half for the consumer.
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: GatewayEvent) {
        // A dropped receiver means no one is listening; not an error.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(GatewayEvent::SessionStatusChanged {
            session_id: SessionId::new("sess-1"),
            status: SessionStatus::Active,
        });

        match rx.try_recv().unwrap() {
            GatewayEvent::SessionStatusChanged { session_id, status } => {
                assert_eq!(session_id.as_str(), "sess-1");
                assert_eq!(status, SessionStatus::Active);
            }
            _ => panic!("wrong event"),
        }
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(GatewayEvent::EnrollmentRejected {
            peer: "10.0.0.1".parse().unwrap(),
            reason: "rate limited".to_string(),
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = GatewayEvent::EnrollmentAccepted {
            connection_id: ConnectionId::new("conn-1"),
            peer: "192.168.1.5".parse().unwrap(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("enrollment_accepted"));
    }
}
