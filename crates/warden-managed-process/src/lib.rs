//! # Warden Managed Process
//!
//! The per-process RPC control handle of the warden supervisor, built as an
//! actor-style state machine:
//! - Single event loop owns all per-process state (connection, queued
//!   callers, worker set)
//! - Message enum represents commands to the process
//! - Handle struct provides the public API by sending commands over a channel
//!
//! ## Connection Lifecycle
//!
//! Connections are lazy: nothing is opened until `connect` or a proxied
//! operation needs the remote. While an attempt is in flight, additional
//! callers are queued and released FIFO with the shared outcome. Exactly
//! one channel is ever opened per attempt, which is the principal invariant
//! this state machine enforces. Channel signals (`ready`/`error`) arrive
//! through pump tasks tagged with an attempt id, so signals from abandoned
//! channels cannot corrupt a later connection.
//!
//! ## Biased Select Trade-off
//!
//! The actor's `select!` is biased towards channel signals: resolving an
//! attempt releases queued waiters and runs queued operations before new
//! commands are accepted. Commands are never starved in practice because
//! signals are rare (at most one `ready` plus occasional errors per
//! channel).
//!
//! ## Detached Operation Failures
//!
//! Proxied operations come in awaited and detached flavors. Awaited calls
//! receive errors through their `ProcessResult`. Detached calls have no
//! listener, and a remote-side failure must not be silently dropped: it
//! terminates the actor task, turning subsequent handle calls into
//! `HandleUnavailable` errors. Connect-phase failures of detached calls
//! are logged and dropped instead; only remote operation errors are fatal.

mod actor;
mod commands;
mod handle;
mod types;

#[cfg(test)]
mod tests;

pub use handle::ManagedProcess;
pub use types::{
    ConnectionStatus, ManagedProcessConfig, ProcessSnapshot, ProcessStatus, Worker,
};

use actor::ManagedProcessActor;
use commands::ProcessCommand;
use std::sync::Arc;
use tokio::sync::mpsc;
use types::ChannelSignal;
use warden_remote::RpcChannelFactory;

/// Capacity of the handle-to-actor command channel; callers await when it
/// is full, which gives natural backpressure.
const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Capacity of the channel-signal queue (pump tasks to actor).
const SIGNAL_QUEUE_CAPACITY: usize = 16;

impl ManagedProcess {
    /// Create a managed process and spawn its actor.
    ///
    /// Must be called within a tokio runtime. The actor runs until every
    /// handle clone has been dropped; on the way out it ends the remote
    /// if still connected.
    pub fn new(config: ManagedProcessConfig, factory: Arc<dyn RpcChannelFactory>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ProcessCommand>(COMMAND_QUEUE_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel::<ChannelSignal>(SIGNAL_QUEUE_CAPACITY);

        let id = config.id.clone();
        let actor = ManagedProcessActor::new(config, factory, signal_tx);
        tokio::spawn(actor.run(cmd_rx, signal_rx));

        ManagedProcess { id, cmd_tx }
    }
}
