//! Action executor seam
//!
//! The controller never touches the OS network stack itself; it hands
//! sequence-tagged [`ActionDispatch`] envelopes to an [`ActionExecutor`]
//! and learns the outcome from [`Confirmation`](crate::message::Confirmation)
//! messages arriving back on its own queue. Dispatch is a non-blocking
//! enqueue, so a slow tunnel establishment never stalls event processing.

use crate::message::ActionDispatch;
use tokio::sync::mpsc;
use tracing::warn;

/// Carries out enforcement actions against the VPN/firewall subsystem
///
/// Contract: exactly one terminal confirmation (success or failure) per
/// dispatched envelope, eventually, or the controller's confirmation
/// timeout fires. A dispatch with a higher sequence number supersedes an
/// outstanding one for the same target; the executor should abandon the
/// stale request rather than complete both.
pub trait ActionExecutor: Send {
    /// Enqueue an action for execution; must not block
    fn dispatch(&mut self, dispatch: ActionDispatch);
}

/// Executor that forwards dispatches over a channel
///
/// The OS-facing subsystem (tunnel manager, firewall shim) sits on the
/// receiving end and reports back through the controller's confirmation
/// queue.
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<ActionDispatch>,
}

impl ChannelExecutor {
    /// Create an executor and the receiver for the OS-facing side
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ActionDispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ActionExecutor for ChannelExecutor {
    fn dispatch(&mut self, dispatch: ActionDispatch) {
        if self.tx.send(dispatch).is_err() {
            // Receiver gone: the subsystem shut down. The confirmation
            // timeout will classify the dispatch as failed.
            warn!(seq = dispatch.seq, action = %dispatch.action, "executor channel closed");
        }
    }
}
