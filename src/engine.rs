//! Rule engine
//!
//! [`decide`] is the heart of the crate: a pure function from the rule
//! configuration, the current tunnel and kill-switch states, and one
//! network event to an ordered sequence of enforcement actions. It does
//! no I/O and holds no state, which is what makes the enforcement policy
//! unit-testable without mocking the OS.
//!
//! # Ordering and tie-breaks
//!
//! Contradictory rule combinations are legal, so the engine has a fixed
//! resolution policy:
//!
//! - Kill-switch actions are emitted before connect/disconnect actions,
//!   so traffic is blocked before a tunnel transition can leak it.
//! - If both kill-switch rules are set, enable wins and disable is
//!   suppressed (fail safe toward blocking).
//! - If both connect and disconnect rules are set, disconnect wins and
//!   connect is suppressed (fail safe toward not-connected). With the
//!   tunnel already down this resolves to an empty output: disconnect
//!   is a no-op against a down tunnel, not a dispatched action.

use crate::config::RuleConfig;
use crate::message::{Action, NetworkEvent};
use crate::state::{KillSwitchState, VpnState};

/// Decide which actions a network event requires
///
/// Total over its input domain: never fails, never blocks, and returns
/// the same sequence for the same inputs. Callers supply the latest
/// confirmed state and re-invoke on every event; the engine performs no
/// retries of its own.
pub fn decide(
    config: &RuleConfig,
    vpn: VpnState,
    kill_switch: KillSwitchState,
    event: NetworkEvent,
) -> Vec<Action> {
    match event {
        NetworkEvent::NetworkLost => on_network_lost(config, kill_switch),
        NetworkEvent::NetworkAvailable { .. } | NetworkEvent::NetworkChanged => {
            on_network_up(config, vpn, kill_switch)
        }
    }
}

/// Nothing to connect to on a lost network; the only concern is that an
/// active kill-switch policy never leaves traffic unprotected.
fn on_network_lost(config: &RuleConfig, kill_switch: KillSwitchState) -> Vec<Action> {
    let mut actions = Vec::new();
    if config.kill_switch_enabled && kill_switch == KillSwitchState::Disabled {
        actions.push(Action::EnableKillSwitch);
    }
    actions
}

fn on_network_up(
    config: &RuleConfig,
    vpn: VpnState,
    kill_switch: KillSwitchState,
) -> Vec<Action> {
    let mut actions = Vec::new();

    // Kill-switch actions first; enable takes precedence over disable.
    if config.enable_kill_switch_on_network_change && kill_switch == KillSwitchState::Disabled {
        actions.push(Action::EnableKillSwitch);
    } else if config.disable_kill_switch_on_network_change
        && !config.enable_kill_switch_on_network_change
        && kill_switch == KillSwitchState::Enabled
    {
        actions.push(Action::DisableKillSwitch);
    }

    // Tunnel actions; disconnect takes precedence over connect.
    if config.disconnect_on_network_change && vpn.is_active() {
        actions.push(Action::Disconnect);
    } else if config.connect_on_network_change
        && !config.disconnect_on_network_change
        && vpn == VpnState::Disconnected
    {
        actions.push(Action::Connect);
    }

    actions
}
