//! Persistence seams for gateway records
//!
//! Durable storage belongs to the control plane; the gateway talks to it
//! through these traits. `MemoryStore` is the in-process backend used by
//! standalone deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use tg_core::error::StoreError;
use tg_core::types::{
    Annotation, AnnotationId, ConnectionId, SearchEntry, SearchFilters, SessionId, TerminalConnection,
    TerminalSession, Tunnel, TunnelId,
};

/// Storage for enrolled connection records.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn insert_connection(&self, connection: TerminalConnection) -> Result<(), StoreError>;
    async fn get_connection(&self, id: &ConnectionId) -> Result<TerminalConnection, StoreError>;
    async fn list_connections(&self) -> Result<Vec<TerminalConnection>, StoreError>;
    async fn update_connection(&self, connection: TerminalConnection) -> Result<(), StoreError>;
}

/// Storage for sessions, tunnels, and captured annotations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: TerminalSession) -> Result<(), StoreError>;
    async fn get_session(&self, id: &SessionId) -> Result<TerminalSession, StoreError>;
    async fn update_session(&self, session: TerminalSession) -> Result<(), StoreError>;
    async fn list_sessions(&self) -> Result<Vec<TerminalSession>, StoreError>;

    async fn insert_tunnel(&self, tunnel: Tunnel) -> Result<(), StoreError>;
    async fn get_tunnel(&self, id: &TunnelId) -> Result<Tunnel, StoreError>;
    async fn update_tunnel(&self, tunnel: Tunnel) -> Result<(), StoreError>;
    async fn tunnels_for_session(&self, id: &SessionId) -> Result<Vec<Tunnel>, StoreError>;

    async fn insert_annotation(&self, annotation: Annotation) -> Result<(), StoreError>;
    async fn search_annotations(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchEntry>, StoreError>;
}

/// In-memory backend over concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    connections: DashMap<ConnectionId, TerminalConnection>,
    sessions: DashMap<SessionId, TerminalSession>,
    tunnels: DashMap<TunnelId, Tunnel>,
    annotations: DashMap<AnnotationId, Annotation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn insert_connection(&self, connection: TerminalConnection) -> Result<(), StoreError> {
        self.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    async fn get_connection(&self, id: &ConnectionId) -> Result<TerminalConnection, StoreError> {
        self.connections
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::NotFound(format!("connection {id}")))
    }

    async fn list_connections(&self) -> Result<Vec<TerminalConnection>, StoreError> {
        Ok(self.connections.iter().map(|c| c.clone()).collect())
    }

    async fn update_connection(&self, connection: TerminalConnection) -> Result<(), StoreError> {
        if !self.connections.contains_key(&connection.id) {
            return Err(StoreError::NotFound(format!("connection {}", connection.id)));
        }
        self.connections.insert(connection.id.clone(), connection);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: TerminalSession) -> Result<(), StoreError> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<TerminalSession, StoreError> {
        self.sessions
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    async fn update_session(&self, session: TerminalSession) -> Result<(), StoreError> {
        if !self.sessions.contains_key(&session.id) {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<TerminalSession>, StoreError> {
        Ok(self.sessions.iter().map(|s| s.clone()).collect())
    }

    async fn insert_tunnel(&self, tunnel: Tunnel) -> Result<(), StoreError> {
        self.tunnels.insert(tunnel.id.clone(), tunnel);
        Ok(())
    }

    async fn get_tunnel(&self, id: &TunnelId) -> Result<Tunnel, StoreError> {
        self.tunnels
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::NotFound(format!("tunnel {id}")))
    }

    async fn update_tunnel(&self, tunnel: Tunnel) -> Result<(), StoreError> {
        if !self.tunnels.contains_key(&tunnel.id) {
            return Err(StoreError::NotFound(format!("tunnel {}", tunnel.id)));
        }
        self.tunnels.insert(tunnel.id.clone(), tunnel);
        Ok(())
    }

    async fn tunnels_for_session(&self, id: &SessionId) -> Result<Vec<Tunnel>, StoreError> {
        Ok(self
            .tunnels
            .iter()
            .filter(|t| &t.session_id == id)
            .map(|t| t.clone())
            .collect())
    }

    async fn insert_annotation(&self, annotation: Annotation) -> Result<(), StoreError> {
        self.annotations.insert(annotation.id.clone(), annotation);
        Ok(())
    }

    async fn search_annotations(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchEntry>, StoreError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut entries = Vec::new();
        for annotation in self.annotations.iter() {
            if !self.annotation_matches(&annotation, filters) {
                continue;
            }

            let score = score_terms(&annotation.content, &annotation.tags, &terms);
            if !terms.is_empty() && score == 0.0 {
                continue;
            }

            entries.push(SearchEntry {
                annotation: annotation.clone(),
                score,
            });
        }

        // Best matches first, newest breaking ties.
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.annotation.captured_at.cmp(&a.annotation.captured_at))
        });

        Ok(entries)
    }
}

impl MemoryStore {
    fn annotation_matches(&self, annotation: &Annotation, filters: &SearchFilters) -> bool {
        if let Some(session_id) = &filters.session_id {
            if &annotation.session_id != session_id {
                return false;
            }
        }

        if let Some(kind) = &filters.kind {
            if &annotation.kind != kind {
                return false;
            }
        }

        if let Some(tag) = &filters.tag {
            if !annotation.tags.iter().any(|t| t == tag) {
                return false;
            }
        }

        if let Some(after) = filters.after {
            if annotation.captured_at < after {
                return false;
            }
        }

        if let Some(before) = filters.before {
            if annotation.captured_at > before {
                return false;
            }
        }

        // Connection and host filters go through the owning session.
        if filters.connection_id.is_some() || filters.host.is_some() {
            let Some(session) = self.sessions.get(&annotation.session_id) else {
                return false;
            };

            if let Some(connection_id) = &filters.connection_id {
                if &session.connection_id != connection_id {
                    return false;
                }
            }

            if let Some(host) = &filters.host {
                match self.connections.get(&session.connection_id) {
                    Some(connection) if &connection.host == host => {}
                    _ => return false,
                }
            }
        }

        true
    }
}

fn score_terms(content: &str, tags: &[String], terms: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }

    let haystack = content.to_lowercase();
    let matched = terms
        .iter()
        .filter(|term| {
            haystack.contains(term.as_str())
                || tags.iter().any(|tag| tag.to_lowercase() == **term)
        })
        .count();

    matched as f32 / terms.len() as f32
}
