//! # Warden Remote
//!
//! The RPC seam between the supervisor and a managed process.
//!
//! The wire protocol is deliberately out of scope here: a channel is an
//! opaque object that emits at most one `Ready` carrying the remote's
//! capabilities, and may emit `Error` at any point before or after that.
//! Implementations (unix sockets, gRPC, in-process fakes for tests) live
//! behind [`RpcChannelFactory`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use warden_common::{ProcessResult, SocketId};

/// Signals emitted by an RPC channel while it is alive.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The channel is established; carries the remote's callable operations.
    Ready(Box<dyn ProcessRemote>),
    /// The channel failed, either while opening or after it was ready.
    Error(warden_common::ProcessError),
}

/// An open (or opening) RPC channel to a managed process.
///
/// The owner drives the channel by receiving from `events`. Dropping the
/// channel abandons the connection attempt.
#[derive(Debug)]
pub struct RpcChannel {
    pub events: mpsc::Receiver<ChannelEvent>,
}

impl RpcChannel {
    pub fn new(events: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { events }
    }
}

/// Factory producing RPC channels from socket identifiers.
///
/// `open` may fail synchronously (e.g. the transport rejects the socket
/// before any I/O happens); callers must convert that into their normal
/// error path rather than let it escape.
pub trait RpcChannelFactory: Send + Sync {
    fn open(&self, id: &str, socket: &SocketId) -> ProcessResult<RpcChannel>;
}

/// Operations callable on a connected managed process.
///
/// Every control operation the supervisor forwards follows this shape;
/// `kill` and `restart` are the representative set.
#[async_trait]
pub trait ProcessRemote: Send + std::fmt::Debug {
    /// Terminate the remote process.
    async fn kill(&mut self) -> ProcessResult<()>;

    /// Restart the remote process in place.
    async fn restart(&mut self) -> ProcessResult<()>;

    /// Tear the channel down. Resolves once the remote acknowledges the
    /// teardown; a transport with synchronous teardown simply returns an
    /// already-ready future.
    async fn end(&mut self);
}
