//! Enrollment connection handler
//!
//! One handler per inbound SSH connection. The password carries the
//! enrollment token; the username becomes the account the gateway will
//! later use to reach the host over outbound SSH. A connection whose
//! address is already locked out is refused before the token is looked
//! at.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};

use tg_core::error::AuthError;
use tg_core::events::GatewayEvent;
use tg_core::types::{
    AuthMethod, ConnectionId, ConnectionRecordStatus, TerminalConnection,
};

use crate::state::GatewayState;

/// Handler for a single enrollment attempt.
pub struct EnrollHandler {
    state: Arc<GatewayState>,
    peer_addr: SocketAddr,
    /// Set once authentication succeeds.
    enrolled: Option<ConnectionId>,
}

impl EnrollHandler {
    pub fn new(state: Arc<GatewayState>, peer_addr: SocketAddr) -> Self {
        Self {
            state,
            peer_addr,
            enrolled: None,
        }
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        }
    }

    /// Register the peer as a new connection record.
    async fn register(&mut self, user: &str) -> Result<ConnectionId, anyhow::Error> {
        let connection = TerminalConnection {
            id: ConnectionId::generate(),
            host: self.peer_addr.ip().to_string(),
            port: 22,
            username: user.to_string(),
            // Credential reference is filled in by the operator after
            // enrollment; until then the record cannot be dialed.
            auth: AuthMethod::Password {
                credential_ref: String::new(),
            },
            host_key_fingerprint: None,
            status: ConnectionRecordStatus::Enrolled,
            created_at: Utc::now(),
        };

        let id = connection.id.clone();
        self.state.connections.insert_connection(connection).await?;
        Ok(id)
    }
}

impl Handler for EnrollHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let peer_ip = self.peer_addr.ip();

        // The listener already drops locked-out peers before the
        // handshake; this re-check covers failures recorded while the
        // handshake was in flight.
        if self.state.limiter.is_rate_limited(peer_ip) {
            self.state.events.emit(GatewayEvent::EnrollmentRejected {
                peer: peer_ip,
                reason: "rate limited".to_string(),
            });
            return Ok(Self::reject());
        }

        tracing::info!(peer = %peer_ip, user, "enrollment attempt");

        match self.state.validator.validate(password).await {
            Ok(true) => {
                self.state.limiter.clear(peer_ip);

                let connection_id = self.register(user).await?;
                tracing::info!(peer = %peer_ip, %connection_id, "enrollment accepted");
                self.state.events.emit(GatewayEvent::EnrollmentAccepted {
                    connection_id: connection_id.clone(),
                    peer: peer_ip,
                });

                self.enrolled = Some(connection_id);
                Ok(Auth::Accept)
            }
            Ok(false) => {
                self.state.limiter.record_failed_attempt(peer_ip);
                self.state.events.emit(GatewayEvent::EnrollmentRejected {
                    peer: peer_ip,
                    reason: "invalid token".to_string(),
                });
                Ok(Self::reject())
            }
            Err(AuthError::ValidatorUnavailable(detail)) => {
                // An outage is not the client's fault; reject without
                // counting it against the address.
                tracing::error!(peer = %peer_ip, detail, "token validator unavailable");
                self.state.events.emit(GatewayEvent::EnrollmentRejected {
                    peer: peer_ip,
                    reason: "validator unavailable".to_string(),
                });
                Ok(Self::reject())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        // Enrollment is complete once auth succeeds; the channel only
        // exists to report the assigned connection id back to the host.
        if let Some(id) = &self.enrolled {
            let banner = format!("enrolled {id}\r\n");
            session.data(channel.id(), CryptoVec::from_slice(banner.as_bytes()))?;
            session.close(channel.id())?;
        }
        Ok(true)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(peer = %self.peer_addr, ?channel, "channel closed");
        Ok(())
    }
}
