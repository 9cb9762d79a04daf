//! # Warden Common
//!
//! Shared types for the warden supervisor:
//! - `ProcessError` / `ProcessResult` used throughout the workspace
//! - `SocketId`, the opaque handle identifying where a process's RPC
//!   channel connects

pub mod errors;
pub mod types;

pub use errors::{ProcessError, ProcessResult};
pub use types::SocketId;
