//! Message types flowing between the network observer, the controller,
//! and the VPN/firewall subsystem.

use crate::config::RuleConfig;
use crate::state::{KillSwitchState, VpnState};
use std::fmt;

/// A network-state transition observed by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// All connectivity was lost
    NetworkLost,
    /// A network became available
    NetworkAvailable {
        /// Whether the user has marked this network as trusted.
        /// Carried for observability; it does not gate any rule.
        trusted: bool,
    },
    /// The active network changed (e.g. Wi-Fi to mobile)
    NetworkChanged,
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEvent::NetworkLost => write!(f, "network-lost"),
            NetworkEvent::NetworkAvailable { trusted } => {
                write!(f, "network-available(trusted={trusted})")
            }
            NetworkEvent::NetworkChanged => write!(f, "network-changed"),
        }
    }
}

/// An enforcement action requested by the rule engine
///
/// Pure output value: the engine never assumes an action succeeded;
/// only a confirmation from the VPN/firewall subsystem moves the
/// tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Establish the VPN tunnel
    Connect,
    /// Tear down the VPN tunnel
    Disconnect,
    /// Start blocking non-tunnel traffic
    EnableKillSwitch,
    /// Stop blocking non-tunnel traffic
    DisableKillSwitch,
}

impl Action {
    /// The confirmed VPN state this action requests, if it targets the tunnel
    pub fn target_vpn_state(&self) -> Option<VpnState> {
        match self {
            Action::Connect => Some(VpnState::Connected),
            Action::Disconnect => Some(VpnState::Disconnected),
            _ => None,
        }
    }

    /// The transitional VPN state while this action is in flight
    pub fn transitional_vpn_state(&self) -> Option<VpnState> {
        match self {
            Action::Connect => Some(VpnState::Connecting),
            Action::Disconnect => Some(VpnState::Disconnecting),
            _ => None,
        }
    }

    /// The kill-switch state this action requests, if it targets the firewall
    pub fn target_kill_switch_state(&self) -> Option<KillSwitchState> {
        match self {
            Action::EnableKillSwitch => Some(KillSwitchState::Enabled),
            Action::DisableKillSwitch => Some(KillSwitchState::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Connect => write!(f, "connect"),
            Action::Disconnect => write!(f, "disconnect"),
            Action::EnableKillSwitch => write!(f, "enable-kill-switch"),
            Action::DisableKillSwitch => write!(f, "disable-kill-switch"),
        }
    }
}

/// An action tagged with its dispatch sequence number
///
/// The sequence number is monotonically increasing per controller; the
/// executor echoes it back in the terminal [`Confirmation`], and stale
/// confirmations are fenced out by comparing against the latest
/// outstanding sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDispatch {
    /// Monotonic dispatch sequence number
    pub seq: u64,
    /// The requested action
    pub action: Action,
}

/// Terminal outcome of a dispatched action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The OS-level action completed
    Completed,
    /// The OS-level action failed (e.g. tunnel failed to establish)
    Failed(String),
}

/// Asynchronous acknowledgment from the VPN/firewall subsystem
///
/// Exactly one terminal confirmation is expected per dispatched action;
/// if none arrives within the controller's timeout the dispatch is
/// treated as failed-and-reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Sequence number of the dispatch being confirmed
    pub seq: u64,
    /// Terminal outcome
    pub outcome: Outcome,
}

impl Confirmation {
    /// A successful confirmation for the given dispatch
    pub fn completed(seq: u64) -> Self {
        Self {
            seq,
            outcome: Outcome::Completed,
        }
    }

    /// A failure confirmation for the given dispatch
    pub fn failed(seq: u64, reason: impl Into<String>) -> Self {
        Self {
            seq,
            outcome: Outcome::Failed(reason.into()),
        }
    }
}

/// Why a dispatched action did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The executor reported a terminal failure
    Executor,
    /// No confirmation arrived in time; outcome unknown, assumed unsafe
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Executor => write!(f, "executor failure"),
            FailureKind::Timeout => write!(f, "confirmation timeout"),
        }
    }
}

/// Change notifications published to the display surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The rule configuration changed (user toggle persisted)
    RulesChanged(RuleConfig),
    /// A confirmed enforcement-state transition
    EnforcementChanged {
        vpn: VpnState,
        kill_switch: KillSwitchState,
    },
    /// A dispatched action failed; state remains at its last confirmed value
    ActionFailed { action: Action, kind: FailureKind },
}
