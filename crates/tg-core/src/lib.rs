//! tg-core: Core abstractions and configuration for termgate
//!
//! This crate provides shared domain types, the gateway error taxonomy,
//! configuration structures and the collaborator traits (event sink, token
//! validation) used by the gateway daemon.

pub mod config;
pub mod error;
pub mod events;
pub mod sanitize;
pub mod types;

pub use error::GatewayError;
pub use events::{EventSink, GatewayEvent};
pub use types::{ConnectionId, SessionId, SessionStatus, TunnelId, WorkerId};
