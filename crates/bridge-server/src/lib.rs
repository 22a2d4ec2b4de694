//! bridge-server
//!
//! Async runtime of the bridge: one session task per live match, a GTP
//! subprocess per session when needed, and the JSON-lines transport.

pub mod config;
pub mod types;
pub mod engine;
pub mod gtp_engine;
pub mod session;
pub mod server;
