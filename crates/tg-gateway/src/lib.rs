//! termgate gateway
//!
//! The gateway runs the SSH-facing enrollment server, manages trust
//! material (host keys and the worker RPC certificate bundle), pools
//! outbound SSH connections to enrolled hosts, and drives tmux-backed
//! sessions on per-host workers over mutually authenticated RPC.

pub mod connection;
pub mod enroll;
pub mod ratelimit;
pub mod registry;
pub mod state;
pub mod trust;
pub mod worker;

pub use state::{GatewayState, GatewayStatus};
