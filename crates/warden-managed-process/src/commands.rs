//! Command messages sent from the handle to the actor.

use crate::types::{ProcessSnapshot, ProcessStatus, RemoteOp, Worker};
use tokio::sync::oneshot;
use warden_common::ProcessResult;

/// Commands accepted by the managed-process actor. One oneshot responder
/// per command; `Remote` responders are optional to support detached
/// (fire-and-forget) operation calls.
pub(crate) enum ProcessCommand {
    Connect {
        resp: oneshot::Sender<ProcessResult<()>>,
    },
    Disconnect {
        resp: oneshot::Sender<ProcessResult<()>>,
    },
    Remote {
        op: RemoteOp,
        resp: Option<oneshot::Sender<ProcessResult<()>>>,
    },
    AddWorker {
        worker: Worker,
        resp: oneshot::Sender<ProcessResult<()>>,
    },
    RemoveWorker {
        worker_id: String,
        resp: oneshot::Sender<ProcessResult<()>>,
    },
    Update {
        snapshot: ProcessSnapshot,
        resp: oneshot::Sender<ProcessResult<()>>,
    },
    GetWorkers {
        resp: oneshot::Sender<ProcessResult<Vec<Worker>>>,
    },
    GetStatus {
        resp: oneshot::Sender<ProcessStatus>,
    },
}
