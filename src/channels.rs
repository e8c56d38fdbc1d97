//! External interfaces (§4.10, C11): the channel bundle connecting the
//! `Agent` to its executor, plus the cooperative cancellation primitive
//! (`Scope`) threaded through the provider stream, tool execution, and
//! command execution (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};

use crate::event::{AgentEvent, ApprovalResponse, Input};

/// Payload of the dedicated cancel channel (§4.7's "Cancel requests are
/// handled on a dedicated worker distinct from the main agent loop"),
/// mirroring `Input::Cancel`'s payload: `None` cancels the current LLM
/// stream/turn, `Some(exec_id)` cancels one running command.
pub type CancelRequest = Option<String>;

/// Default event channel capacity (§5: "buffered (default 10)").
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 10;

/// The Agent's side of the channel bundle. Owned and driven by `Agent::run`.
pub struct AgentChannels {
    pub input: mpsc::Receiver<Input>,
    pub shutdown: oneshot::Receiver<()>,
    pub approval: mpsc::Receiver<(String, ApprovalResponse)>,
    pub cancel: mpsc::Receiver<CancelRequest>,
    pub event: mpsc::Sender<AgentEvent>,
    pub done: oneshot::Sender<()>,
}

/// The executor's side: what the caller of `Agent::new`/`spawn` gets back to
/// drive and observe the agent.
pub struct ExecutorHandle {
    pub input: mpsc::Sender<Input>,
    pub shutdown: oneshot::Sender<()>,
    pub approval: mpsc::Sender<(String, ApprovalResponse)>,
    pub cancel: mpsc::Sender<CancelRequest>,
    pub event: mpsc::Receiver<AgentEvent>,
    pub done: oneshot::Receiver<()>,
}

/// Build a connected `(AgentChannels, ExecutorHandle)` pair.
///
/// Ownership of closing each channel follows §4.10: `input`/`approval`/
/// `cancel` are closed by the executor dropping its `Sender`; `shutdown` is
/// sent (once) by the executor to request a stop; `event` and `done` are
/// closed by the Agent on shutdown.
pub fn channel_pair(event_capacity: usize) -> (AgentChannels, ExecutorHandle) {
    let (input_tx, input_rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (approval_tx, approval_rx) = mpsc::channel(32);
    let (cancel_tx, cancel_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));
    let (done_tx, done_rx) = oneshot::channel();

    (
        AgentChannels {
            input: input_rx,
            shutdown: shutdown_rx,
            approval: approval_rx,
            cancel: cancel_rx,
            event: event_tx,
            done: done_tx,
        },
        ExecutorHandle {
            input: input_tx,
            shutdown: shutdown_tx,
            approval: approval_tx,
            cancel: cancel_tx,
            event: event_rx,
            done: done_rx,
        },
    )
}

/// Cooperative cancellation token shared between the agent loop, the
/// provider stream, tool execution, and command execution (§5's
/// "Cancellation semantics").
#[derive(Clone, Default)]
pub struct Scope {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called. Safe to call from multiple
    /// cloned handles; cheap to poll repeatedly.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
