//! Network rule configuration
//!
//! A [`RuleConfig`] is an immutable snapshot of the four user-configurable
//! network rules plus the global kill-switch flag. All sixteen rule
//! combinations are legal, including contradictory ones ("connect on
//! change" together with "disconnect on change"); the engine resolves
//! contradictions toward the safer state at decision time.

use crate::store::{SettingsStore, StoreError};
use serde::{Deserialize, Serialize};

/// The four network rules a user can toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    /// Connect the VPN when the network changes or comes up
    ConnectOnNetworkChange,
    /// Enable the kill switch when the network changes or comes up
    EnableKillSwitchOnNetworkChange,
    /// Disconnect the VPN when the network changes or comes up
    DisconnectOnNetworkChange,
    /// Disable the kill switch when the network changes or comes up
    DisableKillSwitchOnNetworkChange,
}

impl RuleKind {
    /// Get all rules (the fixed set of four)
    pub fn all() -> &'static [RuleKind] {
        &[
            RuleKind::ConnectOnNetworkChange,
            RuleKind::EnableKillSwitchOnNetworkChange,
            RuleKind::DisconnectOnNetworkChange,
            RuleKind::DisableKillSwitchOnNetworkChange,
        ]
    }

    /// Settings-store key for this rule
    pub fn key(&self) -> &'static str {
        match self {
            RuleKind::ConnectOnNetworkChange => "connectToVpn",
            RuleKind::EnableKillSwitchOnNetworkChange => "enableKillSwitch",
            RuleKind::DisconnectOnNetworkChange => "disconnectFromVpn",
            RuleKind::DisableKillSwitchOnNetworkChange => "disableKillSwitch",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl std::str::FromStr for RuleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connectToVpn" => Ok(RuleKind::ConnectOnNetworkChange),
            "enableKillSwitch" => Ok(RuleKind::EnableKillSwitchOnNetworkChange),
            "disconnectFromVpn" => Ok(RuleKind::DisconnectOnNetworkChange),
            "disableKillSwitch" => Ok(RuleKind::DisableKillSwitchOnNetworkChange),
            _ => Err(ConfigError::UnknownRule(s.to_string())),
        }
    }
}

/// Immutable snapshot of the network rule configuration
///
/// Loaded from the settings store at controller start and replaced
/// wholesale on every user toggle; decision logic only ever sees a
/// complete snapshot, never a half-updated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Connect the VPN on network change
    pub connect_on_network_change: bool,
    /// Enable the kill switch on network change
    pub enable_kill_switch_on_network_change: bool,
    /// Disconnect the VPN on network change
    pub disconnect_on_network_change: bool,
    /// Disable the kill switch on network change
    pub disable_kill_switch_on_network_change: bool,
    /// Is the kill switch globally enabled?
    ///
    /// Governs the network-lost safety behavior independently of the
    /// four per-event rules.
    pub kill_switch_enabled: bool,
}

impl RuleConfig {
    /// Load a snapshot from a settings store
    pub fn load(store: &dyn SettingsStore) -> Result<Self, StoreError> {
        Ok(Self {
            connect_on_network_change: store.rule(RuleKind::ConnectOnNetworkChange)?,
            enable_kill_switch_on_network_change: store
                .rule(RuleKind::EnableKillSwitchOnNetworkChange)?,
            disconnect_on_network_change: store.rule(RuleKind::DisconnectOnNetworkChange)?,
            disable_kill_switch_on_network_change: store
                .rule(RuleKind::DisableKillSwitchOnNetworkChange)?,
            kill_switch_enabled: store.kill_switch_enabled()?,
        })
    }

    /// Read a single rule flag
    pub fn rule(&self, kind: RuleKind) -> bool {
        match kind {
            RuleKind::ConnectOnNetworkChange => self.connect_on_network_change,
            RuleKind::EnableKillSwitchOnNetworkChange => {
                self.enable_kill_switch_on_network_change
            }
            RuleKind::DisconnectOnNetworkChange => self.disconnect_on_network_change,
            RuleKind::DisableKillSwitchOnNetworkChange => {
                self.disable_kill_switch_on_network_change
            }
        }
    }

    /// Produce a new snapshot with one rule changed
    pub fn with_rule(mut self, kind: RuleKind, enabled: bool) -> Self {
        match kind {
            RuleKind::ConnectOnNetworkChange => self.connect_on_network_change = enabled,
            RuleKind::EnableKillSwitchOnNetworkChange => {
                self.enable_kill_switch_on_network_change = enabled
            }
            RuleKind::DisconnectOnNetworkChange => self.disconnect_on_network_change = enabled,
            RuleKind::DisableKillSwitchOnNetworkChange => {
                self.disable_kill_switch_on_network_change = enabled
            }
        }
        self
    }

    /// Is any per-event rule active?
    pub fn any_rule_active(&self) -> bool {
        RuleKind::all().iter().any(|k| self.rule(*k))
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network rule: {0:?}")]
    UnknownRule(String),
}
