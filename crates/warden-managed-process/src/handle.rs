//! ManagedProcess handle - Public API for one supervised process.
//!
//! A lightweight handle that can be cloned and shared across tasks. All
//! methods send commands to the internal actor and await responses.

use crate::commands::ProcessCommand;
use crate::types::{ConnectionStatus, ProcessSnapshot, ProcessStatus, RemoteOp, Worker};
use tokio::sync::{mpsc, oneshot};
use warden_common::{ProcessError, ProcessResult};

/// Handle to a managed process. Cloneable; every clone talks to the same
/// actor.
#[derive(Clone)]
pub struct ManagedProcess {
    pub(crate) id: String,
    pub(crate) cmd_tx: mpsc::Sender<ProcessCommand>,
}

impl ManagedProcess {
    // -------------------------------------------------------------------------
    // Error Mapping Helpers
    // -------------------------------------------------------------------------

    /// Map a channel send error to a ProcessError.
    fn map_send_err(&self, context: &str) -> ProcessError {
        ProcessError::handle_unavailable(
            &self.id,
            format!("{}: actor unavailable (channel closed)", context),
        )
    }

    /// Map a oneshot receive error to a ProcessError.
    fn map_recv_err(&self, context: &str) -> ProcessError {
        ProcessError::handle_unavailable(
            &self.id,
            format!("{}: actor dropped response (internal error)", context),
        )
    }

    /// Stable identifier of the managed process.
    pub fn id(&self) -> &str {
        &self.id
    }

    // -------------------------------------------------------------------------
    // Connection Methods
    // -------------------------------------------------------------------------

    /// Connect to the process's RPC socket.
    ///
    /// Lazy and deduplicated: an already-connected process succeeds
    /// immediately without opening a second channel, and callers arriving
    /// while an attempt is in flight all receive that attempt's outcome in
    /// call order. Fails with a configuration error when no socket is set.
    pub async fn connect(&self) -> ProcessResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::Connect { resp: tx })
            .await
            .map_err(|_| self.map_send_err("connect"))?;
        rx.await.map_err(|_| self.map_recv_err("connect"))?
    }

    /// Tear down the RPC channel.
    ///
    /// Returns only once the remote acknowledged the teardown. A process
    /// without an established remote responds immediately with no side
    /// effect.
    pub async fn disconnect(&self) -> ProcessResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::Disconnect { resp: tx })
            .await
            .map_err(|_| self.map_send_err("disconnect"))?;
        rx.await.map_err(|_| self.map_recv_err("disconnect"))?
    }

    // -------------------------------------------------------------------------
    // Remote Operation Proxies
    // -------------------------------------------------------------------------

    /// Terminate the remote process, connecting first if necessary.
    ///
    /// A failed connection attempt fails the operation with that same
    /// error.
    pub async fn kill(&self) -> ProcessResult<()> {
        self.remote_op(RemoteOp::Kill).await
    }

    /// Restart the remote process in place, connecting first if necessary.
    pub async fn restart(&self) -> ProcessResult<()> {
        self.remote_op(RemoteOp::Restart).await
    }

    /// Terminate the remote process without waiting for the outcome.
    ///
    /// `Ok` means the operation was accepted. A remote-side failure is not
    /// lost: it terminates the process actor, after which every handle
    /// call fails with `HandleUnavailable`. Callers that detach accept
    /// that failures become fatal.
    pub async fn kill_detached(&self) -> ProcessResult<()> {
        self.remote_op_detached(RemoteOp::Kill).await
    }

    /// Restart the remote process without waiting for the outcome. Same
    /// failure contract as [`kill_detached`](Self::kill_detached).
    pub async fn restart_detached(&self) -> ProcessResult<()> {
        self.remote_op_detached(RemoteOp::Restart).await
    }

    async fn remote_op(&self, op: RemoteOp) -> ProcessResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::Remote {
                op,
                resp: Some(tx),
            })
            .await
            .map_err(|_| self.map_send_err(op.name()))?;
        rx.await.map_err(|_| self.map_recv_err(op.name()))?
    }

    async fn remote_op_detached(&self, op: RemoteOp) -> ProcessResult<()> {
        self.cmd_tx
            .send(ProcessCommand::Remote { op, resp: None })
            .await
            .map_err(|_| self.map_send_err(op.name()))
    }

    // -------------------------------------------------------------------------
    // Worker Set (cluster masters only)
    // -------------------------------------------------------------------------

    /// Add a worker to the cluster master's worker set. Idempotent per
    /// worker id.
    ///
    /// # Errors
    /// - `ProcessError::NotClusterManager` on a standalone process
    pub async fn add_worker(&self, worker: Worker) -> ProcessResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::AddWorker { worker, resp: tx })
            .await
            .map_err(|_| self.map_send_err("add_worker"))?;
        rx.await.map_err(|_| self.map_recv_err("add_worker"))?
    }

    /// Remove the worker with the given id; absent ids are a no-op.
    ///
    /// # Errors
    /// - `ProcessError::NotClusterManager` on a standalone process
    pub async fn remove_worker(&self, worker_id: &str) -> ProcessResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::RemoveWorker {
                worker_id: worker_id.to_string(),
                resp: tx,
            })
            .await
            .map_err(|_| self.map_send_err("remove_worker"))?;
        rx.await.map_err(|_| self.map_recv_err("remove_worker"))?
    }

    /// Current worker set of a cluster master, in insertion order.
    ///
    /// # Errors
    /// - `ProcessError::NotClusterManager` on a standalone process
    pub async fn workers(&self) -> ProcessResult<Vec<Worker>> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::GetWorkers { resp: tx })
            .await
            .map_err(|_| self.map_send_err("workers"))?;
        rx.await.map_err(|_| self.map_recv_err("workers"))?
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Replace descriptive metadata from a snapshot and re-derive the
    /// process variant: a snapshot with the cluster flag (or a process
    /// that already is a cluster master) guarantees worker operations are
    /// available afterwards; otherwise the process is standalone and any
    /// prior worker state is discarded.
    pub async fn update(&self, snapshot: ProcessSnapshot) -> ProcessResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::Update { snapshot, resp: tx })
            .await
            .map_err(|_| self.map_send_err("update"))?;
        rx.await.map_err(|_| self.map_recv_err("update"))?
    }

    // -------------------------------------------------------------------------
    // Query Methods
    // -------------------------------------------------------------------------

    /// Current connection state.
    pub async fn connection_state(&self) -> ProcessResult<ConnectionStatus> {
        Ok(self.status().await?.connection)
    }

    /// Point-in-time status snapshot.
    pub async fn status(&self) -> ProcessResult<ProcessStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ProcessCommand::GetStatus { resp: tx })
            .await
            .map_err(|_| self.map_send_err("status"))?;
        rx.await.map_err(|_| self.map_recv_err("status"))
    }
}
