//! ManagedProcessActor - Internal actor that owns per-process state.
//!
//! The actor runs in a single task and owns the connection state machine,
//! the pending-operation queue and the worker set. Handles communicate
//! with it exclusively through commands; channel implementations reach it
//! through pump tasks that forward [`ChannelEvent`]s tagged with an
//! attempt id.

use crate::commands::ProcessCommand;
use crate::types::{
    ChannelSignal, ConnectionState, ConnectionStatus, ManagedProcessConfig, PendingOp,
    ProcessSnapshot, ProcessStatus, ProcessVariant, RemoteOp, Worker,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use warden_common::{ProcessError, ProcessResult};
use warden_remote::{ChannelEvent, ProcessRemote, RpcChannel, RpcChannelFactory};

/// Internal actor struct that owns the state of one managed process.
pub(crate) struct ManagedProcessActor {
    config: ManagedProcessConfig,
    factory: Arc<dyn RpcChannelFactory>,
    /// Sender cloned into channel pump tasks.
    signal_tx: mpsc::Sender<ChannelSignal>,
    connection: ConnectionState,
    /// Operations issued while a connection attempt is in flight.
    pending_ops: VecDeque<PendingOp>,
    variant: ProcessVariant,
    /// Last pid reported via `update`.
    pid: Option<u32>,
    /// Counts opened channels; distinguishes live signals from signals of
    /// abandoned channels.
    next_attempt: u64,
}

impl ManagedProcessActor {
    pub(crate) fn new(
        config: ManagedProcessConfig,
        factory: Arc<dyn RpcChannelFactory>,
        signal_tx: mpsc::Sender<ChannelSignal>,
    ) -> Self {
        let variant = if config.cluster {
            ProcessVariant::ClusterMaster {
                workers: Vec::new(),
            }
        } else {
            ProcessVariant::Standalone
        };

        ManagedProcessActor {
            config,
            factory,
            signal_tx,
            connection: ConnectionState::Disconnected,
            pending_ops: VecDeque::new(),
            variant,
            pid: None,
            next_attempt: 0,
        }
    }

    /// Main event loop for the actor.
    ///
    /// Listens to handle commands and channel signals. Channel signals are
    /// prioritized so a resolved connection attempt releases its queued
    /// waiters before new commands pile up behind it.
    ///
    /// The actor terminates when the command channel closes (all handles
    /// dropped); if still connected it ends the remote on the way out.
    pub(crate) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ProcessCommand>,
        mut signal_rx: mpsc::Receiver<ChannelSignal>,
    ) {
        loop {
            tokio::select! {
                biased;

                maybe_signal = signal_rx.recv() => {
                    match maybe_signal {
                        Some(signal) => self.handle_channel_signal(signal).await,
                        // All signal senders gone can only happen while we
                        // hold no channel; nothing to do but wait for
                        // commands.
                        None => {}
                    }
                }

                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
            }
        }

        // All handles dropped. Tear the channel down best-effort so the
        // remote observes the disconnect.
        if let ConnectionState::Connected { mut remote, .. } =
            std::mem::replace(&mut self.connection, ConnectionState::Disconnected)
        {
            remote.end().await;
        }
        debug!(id = %self.config.id, "managed process actor terminated");
    }

    /// Handle a single command.
    async fn handle_command(&mut self, cmd: ProcessCommand) {
        use ProcessCommand::*;

        match cmd {
            Connect { resp } => self.start_connect(Some(resp)),
            Disconnect { resp } => self.handle_disconnect(resp).await,
            Remote { op, resp } => self.handle_remote_op(op, resp).await,
            AddWorker { worker, resp } => {
                let _ = resp.send(self.handle_add_worker(worker));
            }
            RemoveWorker { worker_id, resp } => {
                let _ = resp.send(self.handle_remove_worker(&worker_id));
            }
            Update { snapshot, resp } => {
                self.handle_update(snapshot);
                let _ = resp.send(Ok(()));
            }
            GetWorkers { resp } => {
                let _ = resp.send(self.handle_get_workers());
            }
            GetStatus { resp } => {
                let _ = resp.send(self.status());
            }
        }
    }

    // -------------------------------------------------------------------------
    // Connection state machine
    // -------------------------------------------------------------------------

    /// Begin (or join) a connection attempt.
    ///
    /// - no socket configured: fails immediately, state unchanged
    /// - already connected: succeeds immediately, no new channel
    /// - attempt in flight: the waiter joins the queue and receives the
    ///   shared outcome
    /// - otherwise: opens exactly one channel through the factory; a
    ///   synchronous factory failure is returned on the caller's error
    ///   path and the state stays `Disconnected`
    fn start_connect(&mut self, waiter: Option<oneshot::Sender<ProcessResult<()>>>) {
        match &mut self.connection {
            ConnectionState::Connected { .. } => {
                if let Some(tx) = waiter {
                    let _ = tx.send(Ok(()));
                }
            }
            ConnectionState::Connecting { waiters, .. } => {
                debug!(id = %self.config.id, "connection attempt already in flight, queueing caller");
                if let Some(tx) = waiter {
                    waiters.push_back(tx);
                }
            }
            ConnectionState::Disconnected => {
                let socket = match self.config.socket.clone() {
                    Some(socket) => socket,
                    None => {
                        let err =
                            ProcessError::configuration(&self.config.id, "no socket specified");
                        if let Some(tx) = waiter {
                            let _ = tx.send(Err(err.clone()));
                        }
                        self.fail_pending_ops(err);
                        return;
                    }
                };

                debug!(id = %self.config.id, socket = %socket, "opening RPC channel");
                match self.factory.open(&self.config.id, &socket) {
                    Ok(channel) => {
                        self.next_attempt += 1;
                        let attempt = self.next_attempt;
                        self.spawn_channel_pump(attempt, channel);

                        let mut waiters = VecDeque::new();
                        if let Some(tx) = waiter {
                            waiters.push_back(tx);
                        }
                        self.connection = ConnectionState::Connecting { attempt, waiters };
                    }
                    Err(err) => {
                        warn!(id = %self.config.id, error = %err, "RPC channel open failed");
                        if let Some(tx) = waiter {
                            let _ = tx.send(Err(err.clone()));
                        }
                        self.fail_pending_ops(err);
                    }
                }
            }
        }
    }

    /// Forward a channel's events into the actor, tagged with the attempt
    /// they belong to. The pump outlives disconnects; stale signals are
    /// filtered by attempt id.
    fn spawn_channel_pump(&self, attempt: u64, mut channel: RpcChannel) {
        let signal_tx = self.signal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = channel.events.recv().await {
                if signal_tx
                    .send(ChannelSignal {
                        attempt,
                        event: Some(event),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = signal_tx
                .send(ChannelSignal {
                    attempt,
                    event: None,
                })
                .await;
        });
    }

    /// Handle a signal from a channel pump.
    async fn handle_channel_signal(&mut self, signal: ChannelSignal) {
        if self.connection.attempt() != Some(signal.attempt) {
            debug!(id = %self.config.id, attempt = signal.attempt, "ignoring signal from abandoned channel");
            return;
        }

        match signal.event {
            Some(ChannelEvent::Ready(remote)) => self.handle_channel_ready(remote).await,
            Some(ChannelEvent::Error(err)) => self.handle_channel_error(err),
            // Event stream ended without a terminal signal; treat it as a
            // channel failure.
            None => self.handle_channel_error(ProcessError::channel(
                &self.config.id,
                "channel closed unexpectedly",
            )),
        }
    }

    /// The in-flight attempt succeeded: store the remote, release every
    /// queued waiter in call order, then run the operations that were
    /// waiting for the connection.
    async fn handle_channel_ready(&mut self, remote: Box<dyn ProcessRemote>) {
        let state = std::mem::replace(&mut self.connection, ConnectionState::Disconnected);
        match state {
            ConnectionState::Connecting {
                attempt,
                mut waiters,
            } => {
                info!(id = %self.config.id, "connected to process RPC socket");
                self.connection = ConnectionState::Connected { attempt, remote };
                while let Some(tx) = waiters.pop_front() {
                    let _ = tx.send(Ok(()));
                }
                self.run_pending_ops().await;
            }
            other => {
                // A second Ready on a live channel has no defined meaning;
                // keep the existing remote.
                warn!(id = %self.config.id, "ignoring duplicate ready signal");
                self.connection = other;
            }
        }
    }

    /// The channel reported an error. While connecting this resolves the
    /// attempt: every waiter and queued operation receives the error. A
    /// post-connect error forces the state back to `Disconnected`.
    fn handle_channel_error(&mut self, err: ProcessError) {
        let state = std::mem::replace(&mut self.connection, ConnectionState::Disconnected);
        match state {
            ConnectionState::Connecting { mut waiters, .. } => {
                warn!(id = %self.config.id, error = %err, "RPC channel failed while connecting");
                while let Some(tx) = waiters.pop_front() {
                    let _ = tx.send(Err(err.clone()));
                }
                self.fail_pending_ops(err);
            }
            ConnectionState::Connected { .. } => {
                warn!(id = %self.config.id, error = %err, "RPC channel failed after connect, dropping remote");
            }
            ConnectionState::Disconnected => {}
        }
    }

    /// Disconnect contract: with no remote this is a no-op that still
    /// responds; when connected, the response is sent only after the
    /// remote acknowledged the teardown.
    async fn handle_disconnect(&mut self, resp: oneshot::Sender<ProcessResult<()>>) {
        let state = std::mem::replace(&mut self.connection, ConnectionState::Disconnected);
        match state {
            ConnectionState::Connected { mut remote, .. } => {
                debug!(id = %self.config.id, "ending RPC channel");
                remote.end().await;
                info!(id = %self.config.id, "disconnected from process RPC socket");
                let _ = resp.send(Ok(()));
            }
            other => {
                // No remote yet; an in-flight connect attempt is left
                // untouched.
                self.connection = other;
                let _ = resp.send(Ok(()));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Remote operation proxy
    // -------------------------------------------------------------------------

    /// Proxy a control operation to the remote, connecting lazily first if
    /// needed. Operations issued while an attempt is in flight run FIFO
    /// once it resolves.
    async fn handle_remote_op(
        &mut self,
        op: RemoteOp,
        resp: Option<oneshot::Sender<ProcessResult<()>>>,
    ) {
        match self.connection.status() {
            ConnectionStatus::Connected => {
                let result = self.run_remote(op).await;
                Self::finish_remote_op(&self.config.id, op, resp, result);
            }
            ConnectionStatus::Connecting => {
                debug!(id = %self.config.id, op = op.name(), "queueing operation behind connection attempt");
                self.pending_ops.push_back(PendingOp { kind: op, resp });
            }
            ConnectionStatus::Disconnected => {
                self.pending_ops.push_back(PendingOp { kind: op, resp });
                self.start_connect(None);
            }
        }
    }

    /// Invoke the operation on the connected remote.
    async fn run_remote(&mut self, op: RemoteOp) -> ProcessResult<()> {
        match &mut self.connection {
            ConnectionState::Connected { remote, .. } => match op {
                RemoteOp::Kill => remote.kill().await,
                RemoteOp::Restart => remote.restart().await,
            },
            // Only reachable if the connection dropped between queueing
            // and execution.
            _ => Err(ProcessError::channel(
                &self.config.id,
                "connection lost before operation ran",
            )),
        }
    }

    /// Run every operation queued behind the connection attempt, in order.
    async fn run_pending_ops(&mut self) {
        while let Some(op) = self.pending_ops.pop_front() {
            let result = self.run_remote(op.kind).await;
            Self::finish_remote_op(&self.config.id, op.kind, op.resp, result);
        }
    }

    /// Complete a proxied operation, choosing between returning the error
    /// to the caller and raising it.
    ///
    /// A remote failure with nobody listening must not vanish: it panics
    /// the actor task, so a detached caller's failure is fatal at that
    /// call site instead of silently dropped.
    fn finish_remote_op(
        id: &str,
        op: RemoteOp,
        resp: Option<oneshot::Sender<ProcessResult<()>>>,
        result: ProcessResult<()>,
    ) {
        match resp {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                if let Err(err) = result {
                    panic!(
                        "unhandled {} failure for process '{}': {}",
                        op.name(),
                        id,
                        err
                    );
                }
            }
        }
    }

    /// Fail every queued operation with the connect error it was waiting
    /// behind. Connect-phase errors are never raised: detached operations
    /// log and drop them.
    fn fail_pending_ops(&mut self, err: ProcessError) {
        while let Some(op) = self.pending_ops.pop_front() {
            match op.resp {
                Some(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
                None => {
                    warn!(
                        id = %self.config.id,
                        op = op.kind.name(),
                        error = %err,
                        "dropping detached operation, connection failed"
                    );
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Worker set and metadata
    // -------------------------------------------------------------------------

    /// Insert a worker keyed by id. Re-adding a present id keeps the
    /// existing entry.
    fn handle_add_worker(&mut self, worker: Worker) -> ProcessResult<()> {
        match &mut self.variant {
            ProcessVariant::ClusterMaster { workers } => {
                if workers.iter().any(|w| w.id == worker.id) {
                    debug!(id = %self.config.id, worker = %worker.id, "worker already present");
                } else {
                    debug!(id = %self.config.id, worker = %worker.id, "worker added");
                    workers.push(worker);
                }
                Ok(())
            }
            ProcessVariant::Standalone => Err(ProcessError::not_cluster_manager(&self.config.id)),
        }
    }

    /// Remove the worker with the matching id; absent ids are a no-op.
    fn handle_remove_worker(&mut self, worker_id: &str) -> ProcessResult<()> {
        match &mut self.variant {
            ProcessVariant::ClusterMaster { workers } => {
                let before = workers.len();
                workers.retain(|w| w.id != worker_id);
                if workers.len() < before {
                    debug!(id = %self.config.id, worker = %worker_id, "worker removed");
                }
                Ok(())
            }
            ProcessVariant::Standalone => Err(ProcessError::not_cluster_manager(&self.config.id)),
        }
    }

    /// Replace descriptive metadata and re-derive the variant. A process
    /// that is (or becomes) a cluster master keeps its worker set; one
    /// that is neither discards any prior worker state.
    fn handle_update(&mut self, snapshot: ProcessSnapshot) {
        debug!(id = %self.config.id, name = %snapshot.name, cluster = snapshot.cluster, "updating process metadata");
        self.config.name = snapshot.name;
        self.pid = snapshot.pid;

        if snapshot.cluster || self.variant.is_cluster() {
            if !self.variant.is_cluster() {
                self.variant = ProcessVariant::ClusterMaster {
                    workers: Vec::new(),
                };
            }
        } else {
            self.variant = ProcessVariant::Standalone;
        }
    }

    fn handle_get_workers(&self) -> ProcessResult<Vec<Worker>> {
        match &self.variant {
            ProcessVariant::ClusterMaster { workers } => Ok(workers.clone()),
            ProcessVariant::Standalone => Err(ProcessError::not_cluster_manager(&self.config.id)),
        }
    }

    fn status(&self) -> ProcessStatus {
        ProcessStatus {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            pid: self.pid,
            connection: self.connection.status(),
            cluster: self.variant.is_cluster(),
            worker_count: self.variant.worker_count(),
        }
    }
}
