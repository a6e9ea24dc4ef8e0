//! Confirmed-state tracking for the VPN tunnel and the kill switch
//!
//! Trackers hold the last *confirmed* state reported by the VPN/firewall
//! subsystem; the rule engine only requests transitions, it never writes
//! state directly. Each dispatched action is tagged with a monotonically
//! increasing sequence number, and only a confirmation carrying the
//! latest outstanding sequence is applied; stale confirmations (an old
//! "connected" arriving after a newer disconnect was requested) are
//! silently fenced out.

use crate::message::{Confirmation, Outcome};
use std::fmt;
use tokio::time::Instant;
use tracing::debug;

/// VPN connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpnState {
    /// Tunnel is down
    Disconnected,
    /// Tunnel establishment requested, not yet confirmed
    Connecting,
    /// Tunnel is up
    Connected,
    /// Tunnel teardown requested, not yet confirmed
    Disconnecting,
}

impl VpnState {
    /// Is the tunnel up?
    pub fn is_connected(&self) -> bool {
        matches!(self, VpnState::Connected)
    }

    /// Is the tunnel up or coming up?
    pub fn is_active(&self) -> bool {
        matches!(self, VpnState::Connected | VpnState::Connecting)
    }
}

impl fmt::Display for VpnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnState::Disconnected => write!(f, "disconnected"),
            VpnState::Connecting => write!(f, "connecting"),
            VpnState::Connected => write!(f, "connected"),
            VpnState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Kill switch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchState {
    /// Non-tunnel traffic is blocked
    Enabled,
    /// Non-tunnel traffic is allowed
    Disabled,
}

impl KillSwitchState {
    /// Is non-tunnel traffic blocked?
    pub fn is_blocking(&self) -> bool {
        matches!(self, KillSwitchState::Enabled)
    }
}

impl fmt::Display for KillSwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillSwitchState::Enabled => write!(f, "enabled"),
            KillSwitchState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Result of applying a confirmation to a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult<S> {
    /// The transition completed; this is the new confirmed state
    Confirmed(S),
    /// The executor reported failure; confirmed state is unchanged
    Failed,
    /// The confirmation's sequence is not the latest outstanding one
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct PendingTransition<S> {
    seq: u64,
    target: S,
    /// State reported while the transition is in flight
    /// (e.g. Connecting for a pending connect)
    transitional: S,
    deadline: Instant,
}

/// Sequence-fenced holder of a confirmed state
///
/// At most one transition is outstanding at a time: a newer dispatch
/// supersedes the previous pending one, and the fence then discards the
/// superseded dispatch's confirmation when it eventually arrives.
#[derive(Debug)]
pub struct StateTracker<S> {
    confirmed: S,
    pending: Option<PendingTransition<S>>,
}

/// Tracker for the VPN tunnel state
pub type VpnStateTracker = StateTracker<VpnState>;
/// Tracker for the kill switch state
pub type KillSwitchTracker = StateTracker<KillSwitchState>;

impl<S: Copy + PartialEq + fmt::Debug> StateTracker<S> {
    /// Create a tracker with an initial confirmed state
    pub fn new(initial: S) -> Self {
        Self {
            confirmed: initial,
            pending: None,
        }
    }

    /// Last confirmed state (never optimistically updated)
    pub fn confirmed(&self) -> S {
        self.confirmed
    }

    /// State as observed right now: the transitional state while a
    /// request is outstanding, otherwise the confirmed state
    pub fn current(&self) -> S {
        self.pending
            .as_ref()
            .map(|p| p.transitional)
            .unwrap_or(self.confirmed)
    }

    /// Sequence number of the outstanding transition, if any
    pub fn pending_seq(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.seq)
    }

    /// Target state of the outstanding transition, if any
    pub fn pending_target(&self) -> Option<S> {
        self.pending.as_ref().map(|p| p.target)
    }

    /// Deadline of the outstanding transition, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Record a newly dispatched transition as the latest outstanding one
    ///
    /// Any previously pending transition is superseded; its confirmation
    /// will be fenced out when it arrives.
    pub fn begin(&mut self, seq: u64, target: S, transitional: S, deadline: Instant) {
        if let Some(old) = &self.pending {
            debug!(
                superseded_seq = old.seq,
                new_seq = seq,
                "pending transition superseded"
            );
        }
        self.pending = Some(PendingTransition {
            seq,
            target,
            transitional,
            deadline,
        });
    }

    /// Apply a terminal confirmation
    ///
    /// Only a confirmation for the latest outstanding sequence moves
    /// state; anything else is reported as stale and discarded.
    pub fn apply(&mut self, confirmation: &Confirmation) -> ApplyResult<S> {
        let Some(pending) = &self.pending else {
            return ApplyResult::Stale;
        };
        if pending.seq != confirmation.seq {
            debug!(
                seq = confirmation.seq,
                outstanding = pending.seq,
                "discarding out-of-order confirmation"
            );
            return ApplyResult::Stale;
        }

        let target = pending.target;
        self.pending = None;
        match &confirmation.outcome {
            Outcome::Completed => {
                self.confirmed = target;
                ApplyResult::Confirmed(target)
            }
            Outcome::Failed(_) => ApplyResult::Failed,
        }
    }

    /// Expire the outstanding transition if its deadline has passed
    ///
    /// Returns the expired sequence number. The confirmed state is left
    /// untouched: a timed-out transition is treated as failed-and-reverted,
    /// so the next decision runs against the pre-dispatch state.
    pub fn expire(&mut self, now: Instant) -> Option<u64> {
        let seq = match &self.pending {
            Some(p) if p.deadline <= now => p.seq,
            _ => return None,
        };
        self.pending = None;
        Some(seq)
    }
}
