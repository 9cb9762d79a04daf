//! Identifier types shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle identifying where a process's RPC channel connects.
///
/// Socket discovery and allocation belong to the orchestrator; this layer
/// only carries the identifier through to the channel factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketId(String);

impl SocketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SocketId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SocketId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
