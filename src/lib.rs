//! netrules - Network-Rule Enforcement Core for a VPN Client
//!
//! Decides, in response to connectivity changes and user toggles,
//! whether to automatically establish or tear down the VPN tunnel and
//! whether to block non-tunnel traffic (kill switch). The surrounding
//! UI, the OS firewall/tunnel primitives, and the platform's network
//! observer are external collaborators; this crate owns only the
//! decision logic and its orchestration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  NetworkEvent   ┌──────────────────────────────┐
//! │   Network   │───────────────▶│        RuleController         │
//! │  Observer   │                 │  ┌────────────────────────┐  │
//! └─────────────┘                 │  │  engine::decide (pure) │  │
//! ┌─────────────┐  set_rule       │  └────────────────────────┘  │
//! │  UI toggle  │───────────────▶│   trackers · store · seq      │
//! └─────────────┘                 └──────┬───────────────▲───────┘
//!                                        │ ActionDispatch │ Confirmation
//!                                        ▼                │
//!                                 ┌──────────────────────────────┐
//!                                 │   VPN / firewall subsystem   │
//!                                 └──────────────────────────────┘
//! ```
//!
//! # Design
//!
//! - **Pure engine**: [`engine::decide`] maps (config, tunnel state,
//!   kill-switch state, event) to an ordered action sequence. No I/O,
//!   total over its inputs, trivially unit-testable.
//! - **Single writer**: one serialized controller queue processes each
//!   event to completion; the trackers and the cached rule snapshot
//!   have exactly one mutator.
//! - **Confirmed state only**: dispatched actions are tagged with
//!   monotonic sequence numbers; trackers move only on the latest
//!   outstanding confirmation, so stale acknowledgments are fenced out
//!   and a failed connect never claims the VPN is up.
//! - **Fail safe**: contradictory rule combinations resolve toward
//!   blocking traffic and staying disconnected; confirmation timeouts
//!   revert to the last confirmed state.

mod config;
mod controller;
pub mod engine;
mod executor;
mod message;
mod state;
mod store;

pub use config::{ConfigError, RuleConfig, RuleKind};
pub use controller::{
    Command, ControllerError, RuleController, DEFAULT_CONFIRMATION_TIMEOUT,
};
pub use executor::{ActionExecutor, ChannelExecutor};
pub use message::{
    Action, ActionDispatch, Confirmation, FailureKind, NetworkEvent, Notification, Outcome,
};
pub use state::{
    ApplyResult, KillSwitchState, KillSwitchTracker, StateTracker, VpnState, VpnStateTracker,
};
pub use store::{JsonFileStore, MemoryStore, SettingsStore, StoreError};
