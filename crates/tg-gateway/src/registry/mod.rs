//! Session/tunnel registry: durable state machine and its persistence seams.

pub mod sessions;
pub mod store;
pub mod tunnels;

pub use sessions::SessionRegistry;
pub use store::{ConnectionStore, MemoryStore, SessionStore};
pub use tunnels::spawn_tunnel_closer;
