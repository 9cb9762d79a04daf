//! Unit tests for the managed-process module.

use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::time::Duration;
use warden_common::{ProcessError, ProcessResult, SocketId};
use warden_remote::{ChannelEvent, ProcessRemote, RpcChannel, RpcChannelFactory};

/// Poll `condition` every 2ms until it returns true or the timeout expires.
async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;

    if result.is_err() {
        panic!("wait_until timed out: {}", description);
    }
}

/// Poll the process's connection state until it matches `want`.
async fn wait_for_connection(proc: &ManagedProcess, want: ConnectionStatus) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if proc.connection_state().await == Ok(want) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;

    if result.is_err() {
        panic!(
            "wait_for_connection timed out waiting for {:?}. Current: {:?}",
            want,
            proc.connection_state().await
        );
    }
}

/// Remote capability fake with a programmable kill outcome and an
/// optionally gated teardown.
#[derive(Debug, Default)]
struct FakeRemote {
    kill_error: Option<ProcessError>,
    kill_calls: Arc<AtomicUsize>,
    restart_calls: Arc<AtomicUsize>,
    /// When set, `end` completes only after the gate is notified.
    end_gate: Option<Arc<Notify>>,
    end_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessRemote for FakeRemote {
    async fn kill(&mut self) -> ProcessResult<()> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        match &self.kill_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn restart(&mut self) -> ProcessResult<()> {
        self.restart_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&mut self) {
        if let Some(gate) = &self.end_gate {
            gate.notified().await;
        }
        self.end_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Channel factory fake: counts opens, optionally fails synchronously,
/// and hands the test the event sender of each opened channel.
#[derive(Default)]
struct FakeChannelFactory {
    opens: AtomicUsize,
    open_error: Mutex<Option<ProcessError>>,
    event_senders: Mutex<Vec<mpsc::Sender<ChannelEvent>>>,
}

impl FakeChannelFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn fail_next_open(&self, err: ProcessError) {
        *self.open_error.lock().unwrap() = Some(err);
    }

    fn latest_sender(&self) -> mpsc::Sender<ChannelEvent> {
        self.event_senders
            .lock()
            .unwrap()
            .last()
            .expect("no channel opened yet")
            .clone()
    }

    async fn emit_ready(&self, remote: FakeRemote) {
        self.latest_sender()
            .send(ChannelEvent::Ready(Box::new(remote)))
            .await
            .expect("actor dropped channel events");
    }

    async fn emit_error(&self, err: ProcessError) {
        self.latest_sender()
            .send(ChannelEvent::Error(err))
            .await
            .expect("actor dropped channel events");
    }

    /// Drop the latest channel's event sender, ending its stream without
    /// a terminal signal.
    fn close_latest_channel(&self) {
        self.event_senders.lock().unwrap().pop();
    }
}

impl RpcChannelFactory for FakeChannelFactory {
    fn open(&self, _id: &str, _socket: &SocketId) -> ProcessResult<RpcChannel> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.open_error.lock().unwrap().take() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(4);
        self.event_senders.lock().unwrap().push(tx);
        Ok(RpcChannel::new(rx))
    }
}

fn test_config(cluster: bool) -> ManagedProcessConfig {
    ManagedProcessConfig {
        id: "web".to_string(),
        name: "web".to_string(),
        socket: Some(SocketId::from("/tmp/warden-test/web.sock")),
        cluster,
    }
}

fn spawn_process(cluster: bool) -> (ManagedProcess, Arc<FakeChannelFactory>) {
    let factory = FakeChannelFactory::new();
    let proc = ManagedProcess::new(test_config(cluster), factory.clone());
    (proc, factory)
}

// ---------------------------------------------------------------------------
// Connection state machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_succeeds_when_channel_becomes_ready() {
    let (proc, factory) = spawn_process(false);

    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });

    wait_until("channel opened", || factory.open_count() == 1).await;
    factory.emit_ready(FakeRemote::default()).await;

    assert_eq!(connect.await.unwrap(), Ok(()));
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn test_connect_without_socket_fails_and_opens_no_channel() {
    let factory = FakeChannelFactory::new();
    let mut config = test_config(false);
    config.socket = None;
    let proc = ManagedProcess::new(config, factory.clone());

    let result = proc.connect().await;
    assert!(matches!(&result, Err(ProcessError::Configuration { .. })));
    assert!(result.unwrap_err().to_string().contains("socket"));
    assert_eq!(factory.open_count(), 0);
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_connect_when_already_connected_opens_no_second_channel() {
    let (proc, factory) = spawn_process(false);

    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;
    factory.emit_ready(FakeRemote::default()).await;
    connect.await.unwrap().unwrap();

    // Second connect resolves immediately without touching the factory.
    proc.connect().await.unwrap();
    assert_eq!(factory.open_count(), 1);
}

#[tokio::test]
async fn test_concurrent_connects_share_one_attempt_and_outcome() {
    let (proc, factory) = spawn_process(false);

    let first = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;

    // These arrive while the attempt is in flight and must queue.
    let second = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    let third = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_for_connection(&proc, ConnectionStatus::Connecting).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    factory.emit_ready(FakeRemote::default()).await;

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
    assert_eq!(third.await.unwrap(), Ok(()));
    assert_eq!(factory.open_count(), 1);
}

#[tokio::test]
async fn test_channel_error_fans_out_to_all_queued_callers() {
    let (proc, factory) = spawn_process(false);

    let first = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;
    let second = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = ProcessError::channel("web", "connection refused");
    factory.emit_error(err.clone()).await;

    assert_eq!(first.await.unwrap(), Err(err.clone()));
    assert_eq!(second.await.unwrap(), Err(err));
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_synchronous_factory_failure_reverts_to_disconnected() {
    let (proc, factory) = spawn_process(false);

    let err = ProcessError::channel("web", "transport rejected socket");
    factory.fail_next_open(err.clone());

    assert_eq!(proc.connect().await, Err(err));
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Disconnected
    );

    // The failure is not sticky: a later attempt opens a fresh channel.
    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("second channel opened", || factory.open_count() == 2).await;
    factory.emit_ready(FakeRemote::default()).await;
    assert_eq!(connect.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_channel_stream_ending_counts_as_channel_error() {
    let (proc, factory) = spawn_process(false);

    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;
    factory.close_latest_channel();

    let result = connect.await.unwrap();
    assert!(matches!(result, Err(ProcessError::Channel { .. })));
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_post_connect_channel_error_forces_disconnected() {
    let (proc, factory) = spawn_process(false);

    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;
    factory.emit_ready(FakeRemote::default()).await;
    connect.await.unwrap().unwrap();

    factory
        .emit_error(ProcessError::channel("web", "remote went away"))
        .await;
    wait_for_connection(&proc, ConnectionStatus::Disconnected).await;

    // The next operation reconnects through a fresh channel.
    let kill_calls = Arc::new(AtomicUsize::new(0));
    let kill = tokio::spawn({
        let proc = proc.clone();
        async move { proc.kill().await }
    });
    wait_until("second channel opened", || factory.open_count() == 2).await;
    factory
        .emit_ready(FakeRemote {
            kill_calls: kill_calls.clone(),
            ..Default::default()
        })
        .await;
    assert_eq!(kill.await.unwrap(), Ok(()));
    assert_eq!(kill_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Remote operation proxy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_proxied_operation_connects_lazily() {
    let (proc, factory) = spawn_process(false);

    // Creating the handle must not touch the factory.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(factory.open_count(), 0);

    let kill_calls = Arc::new(AtomicUsize::new(0));
    let kill = tokio::spawn({
        let proc = proc.clone();
        async move { proc.kill().await }
    });

    wait_until("channel opened by kill", || factory.open_count() == 1).await;
    factory
        .emit_ready(FakeRemote {
            kill_calls: kill_calls.clone(),
            ..Default::default()
        })
        .await;

    assert_eq!(kill.await.unwrap(), Ok(()));
    assert_eq!(kill_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_proxied_operation_fails_with_connect_error() {
    let factory = FakeChannelFactory::new();
    let mut config = test_config(false);
    config.socket = None;
    let proc = ManagedProcess::new(config, factory.clone());

    let result = proc.kill().await;
    assert!(matches!(result, Err(ProcessError::Configuration { .. })));
    assert_eq!(factory.open_count(), 0);
}

#[tokio::test]
async fn test_operations_queued_while_connecting_run_after_ready() {
    let (proc, factory) = spawn_process(false);

    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;

    let kill_calls = Arc::new(AtomicUsize::new(0));
    let restart_calls = Arc::new(AtomicUsize::new(0));
    let kill = tokio::spawn({
        let proc = proc.clone();
        async move { proc.kill().await }
    });
    let restart = tokio::spawn({
        let proc = proc.clone();
        async move { proc.restart().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    factory
        .emit_ready(FakeRemote {
            kill_calls: kill_calls.clone(),
            restart_calls: restart_calls.clone(),
            ..Default::default()
        })
        .await;

    connect.await.unwrap().unwrap();
    assert_eq!(kill.await.unwrap(), Ok(()));
    assert_eq!(restart.await.unwrap(), Ok(()));
    assert_eq!(kill_calls.load(Ordering::SeqCst), 1);
    assert_eq!(restart_calls.load(Ordering::SeqCst), 1);
    assert_eq!(factory.open_count(), 1);
}

#[tokio::test]
async fn test_remote_error_reaches_awaiting_caller() {
    let (proc, factory) = spawn_process(false);

    let kill = tokio::spawn({
        let proc = proc.clone();
        async move { proc.kill().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;

    let err = ProcessError::remote_operation("web", "kill", "permission denied");
    factory
        .emit_ready(FakeRemote {
            kill_error: Some(err.clone()),
            ..Default::default()
        })
        .await;

    assert_eq!(kill.await.unwrap(), Err(err));
    // A remote-side operation failure does not drop the connection.
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn test_detached_remote_error_is_fatal_for_the_actor() {
    let (proc, factory) = spawn_process(false);

    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;
    factory
        .emit_ready(FakeRemote {
            kill_error: Some(ProcessError::remote_operation("web", "kill", "urk")),
            ..Default::default()
        })
        .await;
    connect.await.unwrap().unwrap();

    // Accepted, but nobody listens for the outcome.
    proc.kill_detached().await.unwrap();

    // The unhandled remote failure terminates the actor; subsequent calls
    // surface HandleUnavailable.
    wait_until("actor terminated", || proc.cmd_tx.is_closed()).await;
    assert!(matches!(
        proc.connect().await,
        Err(ProcessError::HandleUnavailable { .. })
    ));
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_when_disconnected_is_a_noop() {
    let (proc, factory) = spawn_process(false);

    proc.disconnect().await.unwrap();
    assert_eq!(factory.open_count(), 0);
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_disconnect_waits_for_remote_end_acknowledgement() {
    let (proc, factory) = spawn_process(false);

    let gate = Arc::new(Notify::new());
    let end_calls = Arc::new(AtomicUsize::new(0));

    let connect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.connect().await }
    });
    wait_until("channel opened", || factory.open_count() == 1).await;
    factory
        .emit_ready(FakeRemote {
            end_gate: Some(gate.clone()),
            end_calls: end_calls.clone(),
            ..Default::default()
        })
        .await;
    connect.await.unwrap().unwrap();

    let disconnect = tokio::spawn({
        let proc = proc.clone();
        async move { proc.disconnect().await }
    });

    // The remote has not acknowledged yet; disconnect must not resolve.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!disconnect.is_finished());
    assert_eq!(end_calls.load(Ordering::SeqCst), 0);

    gate.notify_one();
    assert_eq!(disconnect.await.unwrap(), Ok(()));
    assert_eq!(end_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        proc.connection_state().await.unwrap(),
        ConnectionStatus::Disconnected
    );
}

// ---------------------------------------------------------------------------
// Worker set and update
// ---------------------------------------------------------------------------

fn worker(id: &str) -> Worker {
    Worker {
        id: id.to_string(),
        pid: None,
    }
}

#[tokio::test]
async fn test_add_worker_is_idempotent_per_id() {
    let (proc, _factory) = spawn_process(true);

    proc.add_worker(worker("a")).await.unwrap();
    proc.add_worker(worker("b")).await.unwrap();
    proc.add_worker(worker("a")).await.unwrap();

    let workers = proc.workers().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0].id, "a");
    assert_eq!(workers[1].id, "b");
}

#[tokio::test]
async fn test_remove_worker_removes_matching_entry_only() {
    let (proc, _factory) = spawn_process(true);

    proc.add_worker(worker("a")).await.unwrap();
    proc.add_worker(worker("b")).await.unwrap();

    proc.remove_worker("a").await.unwrap();
    assert_eq!(proc.workers().await.unwrap(), vec![worker("b")]);

    // Absent id is a no-op.
    proc.remove_worker("missing").await.unwrap();
    assert_eq!(proc.workers().await.unwrap(), vec![worker("b")]);
}

#[tokio::test]
async fn test_worker_operations_fail_on_standalone_process() {
    let (proc, _factory) = spawn_process(false);

    assert!(matches!(
        proc.add_worker(worker("a")).await,
        Err(ProcessError::NotClusterManager { .. })
    ));
    assert!(matches!(
        proc.remove_worker("a").await,
        Err(ProcessError::NotClusterManager { .. })
    ));
    assert!(matches!(
        proc.workers().await,
        Err(ProcessError::NotClusterManager { .. })
    ));
}

#[tokio::test]
async fn test_update_replaces_metadata() {
    let (proc, _factory) = spawn_process(false);

    proc.update(ProcessSnapshot {
        name: "renamed".to_string(),
        cluster: false,
        pid: Some(4321),
    })
    .await
    .unwrap();

    let status = proc.status().await.unwrap();
    assert_eq!(status.name, "renamed");
    assert_eq!(status.pid, Some(4321));
    assert!(!status.cluster);
}

#[tokio::test]
async fn test_update_without_cluster_flag_keeps_standalone() {
    let (proc, _factory) = spawn_process(false);

    proc.update(ProcessSnapshot {
        name: "web".to_string(),
        cluster: false,
        pid: None,
    })
    .await
    .unwrap();

    assert!(matches!(
        proc.workers().await,
        Err(ProcessError::NotClusterManager { .. })
    ));
}

#[tokio::test]
async fn test_update_with_cluster_flag_materializes_worker_set() {
    let (proc, _factory) = spawn_process(false);

    proc.update(ProcessSnapshot {
        name: "web".to_string(),
        cluster: true,
        pid: None,
    })
    .await
    .unwrap();

    assert_eq!(proc.workers().await.unwrap(), vec![]);
    proc.add_worker(worker("a")).await.unwrap();
    assert_eq!(proc.workers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_keeps_cluster_master_and_its_workers() {
    let (proc, _factory) = spawn_process(true);

    proc.add_worker(worker("a")).await.unwrap();

    // A cluster master stays a cluster master even when a snapshot omits
    // the flag; its worker set survives.
    proc.update(ProcessSnapshot {
        name: "renamed".to_string(),
        cluster: false,
        pid: None,
    })
    .await
    .unwrap();

    let status = proc.status().await.unwrap();
    assert!(status.cluster);
    assert_eq!(status.worker_count, 1);
    assert_eq!(proc.workers().await.unwrap(), vec![worker("a")]);
}
