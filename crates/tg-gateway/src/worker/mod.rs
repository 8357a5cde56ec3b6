//! Worker RPC: TLS setup and the typed client.

pub mod client;
pub mod tls;

pub use client::{WorkerApi, WorkerClient};
