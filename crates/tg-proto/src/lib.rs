//! tg-proto: Wire schema for the termgate worker RPC channel
//!
//! This crate defines the JSON-line request/response messages exchanged
//! between the gateway and per-host worker processes over mutual TLS,
//! plus the timestamp wire format shared by both sides.

pub mod error;
pub mod rpc;
pub mod timestamp;

pub use error::{RpcErrorKind, WorkerErrorCode};
pub use rpc::{
    ListSessionsRequest, ListSessionsResponse, SessionFilter, StartSessionRequest, WireSession,
    WireSessionDetail, WireWindow, WorkerRequest, WorkerResponse,
};
pub use timestamp::{from_timestamp, to_timestamp, Timestamp};
