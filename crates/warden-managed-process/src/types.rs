//! Shared data types for the managed-process module.
//!
//! This module contains:
//! - Public types exposed to external callers (ManagedProcessConfig,
//!   ProcessSnapshot, Worker, ConnectionStatus, ProcessStatus)
//! - Crate-internal types used by the actor (ConnectionState, RemoteOp,
//!   PendingOp, ProcessVariant, ChannelSignal)

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::oneshot;
use warden_common::{ProcessResult, SocketId};
use warden_remote::{ChannelEvent, ProcessRemote};

// ============================================================================
// Public Types - Exposed to external callers
// ============================================================================

/// Configuration for a managed process, supplied by the orchestrator at
/// registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcessConfig {
    /// Stable process identifier.
    pub id: String,
    /// Human-readable name; replaced by `update`.
    pub name: String,
    /// Where the RPC channel connects. Without a socket the process can
    /// never be connected to.
    pub socket: Option<SocketId>,
    /// Whether the process is a cluster master supervising workers.
    pub cluster: bool,
}

/// Descriptive metadata pushed by the orchestrator when the supervised
/// process reports a change (rename, re-fork, cluster promotion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub name: String,
    pub cluster: bool,
    pub pid: Option<u32>,
}

/// A worker sub-process of a cluster master, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub pid: Option<u32>,
}

/// Externally observable connection state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Point-in-time view of a managed process for external queries.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    pub id: String,
    pub name: String,
    pub pid: Option<u32>,
    pub connection: ConnectionStatus,
    pub cluster: bool,
    pub worker_count: usize,
}

// ============================================================================
// Crate-Internal Types - Used by the actor
// ============================================================================

/// Connection state machine of the actor.
///
/// The shape encodes the invariants: a remote exists exactly while
/// `Connected`, and connect waiters exist exactly while `Connecting`.
pub(crate) enum ConnectionState {
    Disconnected,
    Connecting {
        /// Identifies which opened channel the state belongs to; signals
        /// from abandoned channels carry a stale attempt and are ignored.
        attempt: u64,
        /// Callers queued behind the in-flight attempt, released FIFO with
        /// the shared outcome.
        waiters: VecDeque<oneshot::Sender<ProcessResult<()>>>,
    },
    Connected {
        attempt: u64,
        remote: Box<dyn ProcessRemote>,
    },
}

impl ConnectionState {
    pub(crate) fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting { .. } => ConnectionStatus::Connecting,
            ConnectionState::Connected { .. } => ConnectionStatus::Connected,
        }
    }

    /// The attempt the state is bound to, if any.
    pub(crate) fn attempt(&self) -> Option<u64> {
        match self {
            ConnectionState::Disconnected => None,
            ConnectionState::Connecting { attempt, .. }
            | ConnectionState::Connected { attempt, .. } => Some(*attempt),
        }
    }
}

/// Control operations forwarded to the remote process. Every remote
/// operation is proxied through the same code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteOp {
    Kill,
    Restart,
}

impl RemoteOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            RemoteOp::Kill => "kill",
            RemoteOp::Restart => "restart",
        }
    }
}

/// A proxied operation issued while no connection was established yet.
/// Executed FIFO once the channel is ready, or failed with the connect
/// error otherwise.
pub(crate) struct PendingOp {
    pub kind: RemoteOp,
    /// `None` for detached calls: the caller is not listening for the
    /// outcome.
    pub resp: Option<oneshot::Sender<ProcessResult<()>>>,
}

/// Tagged variant replacing the original's runtime capability injection:
/// a process either is a cluster master with a worker set, or it exposes
/// no worker operations at all.
pub(crate) enum ProcessVariant {
    Standalone,
    ClusterMaster { workers: Vec<Worker> },
}

impl ProcessVariant {
    pub(crate) fn is_cluster(&self) -> bool {
        matches!(self, ProcessVariant::ClusterMaster { .. })
    }

    pub(crate) fn worker_count(&self) -> usize {
        match self {
            ProcessVariant::Standalone => 0,
            ProcessVariant::ClusterMaster { workers } => workers.len(),
        }
    }
}

/// A channel event forwarded into the actor by a pump task, tagged with
/// the attempt it belongs to. `event: None` means the channel's event
/// stream ended without a terminal signal.
pub(crate) struct ChannelSignal {
    pub attempt: u64,
    pub event: Option<ChannelEvent>,
}
