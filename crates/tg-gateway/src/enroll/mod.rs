//! Enrollment: the SSH-facing path by which new hosts register.

pub mod handler;
pub mod listener;
pub mod token;

pub use listener::EnrollServer;
pub use token::{DisabledValidator, HttpTokenValidator, StaticTokenValidator, TokenValidator};
