//! Outbound SSH: credential resolution and the pooled connection manager.

pub mod credentials;
pub mod manager;

pub use manager::{ConnectionManager, ConnectivityStatus, OutboundPool};
