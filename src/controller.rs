//! Rule controller
//!
//! Wires the pure rule engine to the outside world: network events and
//! user toggles come in on one serialized queue, decisions are computed
//! against the currently tracked enforcement state, and the resulting
//! actions are dispatched to the executor with sequence tags. The
//! controller is the only writer of the trackers and the cached rule
//! snapshot, so there is no concurrent-write race to guard against.
//!
//! Failure containment: a failed or timed-out action never moves the
//! trackers. The controller surfaces a [`Notification::ActionFailed`]
//! and leaves state at its last confirmed value, so a failed connect
//! never claims the VPN is up.

use crate::config::{ConfigError, RuleConfig, RuleKind};
use crate::engine;
use crate::executor::ActionExecutor;
use crate::message::{
    Action, ActionDispatch, Confirmation, FailureKind, NetworkEvent, Notification, Outcome,
};
use crate::state::{
    ApplyResult, KillSwitchState, KillSwitchTracker, VpnState, VpnStateTracker,
};
use crate::store::{SettingsStore, StoreError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long to wait for a terminal confirmation before treating a
/// dispatch as failed-and-reverted.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Commands accepted by the controller's serialized queue
///
/// Network observers, UI toggle handlers, and the VPN/firewall subsystem
/// are all producers onto the same queue; the [`RuleController::run`]
/// loop processes one command to completion before the next.
#[derive(Debug)]
pub enum Command {
    /// A network-state transition was observed
    Network(NetworkEvent),
    /// A user toggled a rule
    SetRule {
        name: String,
        enabled: bool,
        reply: oneshot::Sender<Result<RuleConfig, ControllerError>>,
    },
    /// The VPN/firewall subsystem confirmed a dispatched action
    Confirm(Confirmation),
    /// Read the current snapshots for display binding
    Snapshot {
        reply: oneshot::Sender<(RuleConfig, VpnState, KillSwitchState)>,
    },
    /// Stop the controller loop
    Shutdown,
}

/// Orchestrates rule decisions, persistence, and action dispatch
pub struct RuleController {
    /// Cached rule snapshot, refreshed on every set_rule
    config: RuleConfig,
    store: Box<dyn SettingsStore>,
    executor: Box<dyn ActionExecutor>,
    vpn: VpnStateTracker,
    kill_switch: KillSwitchTracker,
    /// Next dispatch sequence number (monotonic, never reused)
    next_seq: u64,
    confirmation_timeout: Duration,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl RuleController {
    /// Create a controller over a settings store and an executor
    ///
    /// Loads the initial rule snapshot from the store. Returns the
    /// receiver half of the display-surface notification channel.
    pub fn new(
        store: Box<dyn SettingsStore>,
        executor: Box<dyn ActionExecutor>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), ControllerError> {
        let config = RuleConfig::load(store.as_ref())?;
        let (notifications, notifications_rx) = mpsc::unbounded_channel();

        info!(?config, "rule controller started");
        Ok((
            Self {
                config,
                store,
                executor,
                vpn: VpnStateTracker::new(VpnState::Disconnected),
                kill_switch: KillSwitchTracker::new(KillSwitchState::Disabled),
                next_seq: 1,
                confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
                notifications,
            },
            notifications_rx,
        ))
    }

    /// Override the confirmation timeout
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Current rule snapshot for display binding
    pub fn current_rule_snapshot(&self) -> RuleConfig {
        self.config
    }

    /// Current enforcement snapshot for display binding
    ///
    /// Reports the transitional state (Connecting/Disconnecting) while a
    /// request is outstanding.
    pub fn current_enforcement_snapshot(&self) -> (VpnState, KillSwitchState) {
        (self.vpn.current(), self.kill_switch.current())
    }

    /// Toggle a rule by its settings-store name
    ///
    /// An unknown name is rejected synchronously and the store is left
    /// unchanged; no action is emitted. On success the change is
    /// persisted first, then the cached snapshot is refreshed from the
    /// store and republished for display.
    pub fn set_rule(&mut self, name: &str, enabled: bool) -> Result<RuleConfig, ControllerError> {
        let kind: RuleKind = name.parse()?;
        info!(rule = %kind, enabled, "user toggled rule");

        self.store.set_rule(kind, enabled)?;
        self.config = RuleConfig::load(self.store.as_ref())?;

        let _ = self
            .notifications
            .send(Notification::RulesChanged(self.config));
        Ok(self.config)
    }

    /// Process one observed network event to completion
    ///
    /// Decides against the cached rule snapshot and the current tracked
    /// states, then dispatches the resulting actions in order.
    pub fn handle_network_event(&mut self, event: NetworkEvent) {
        let (vpn, kill_switch) = self.current_enforcement_snapshot();
        let actions = engine::decide(&self.config, vpn, kill_switch, event);

        debug!(%event, %vpn, %kill_switch, ?actions, "decided");
        for action in actions {
            self.dispatch(action);
        }
    }

    /// Apply a terminal confirmation from the VPN/firewall subsystem
    pub fn handle_confirmation(&mut self, confirmation: Confirmation) {
        if self.vpn.pending_seq() == Some(confirmation.seq) {
            let action = match self.vpn.pending_target() {
                Some(VpnState::Connected) => Action::Connect,
                _ => Action::Disconnect,
            };
            let result = self.vpn.apply(&confirmation);
            self.finish(action, &confirmation, matches!(result, ApplyResult::Confirmed(_)));
        } else if self.kill_switch.pending_seq() == Some(confirmation.seq) {
            let action = match self.kill_switch.pending_target() {
                Some(KillSwitchState::Enabled) => Action::EnableKillSwitch,
                _ => Action::DisableKillSwitch,
            };
            let result = self.kill_switch.apply(&confirmation);
            self.finish(action, &confirmation, matches!(result, ApplyResult::Confirmed(_)));
        } else {
            // Expected race, not a fault: a superseded or timed-out
            // dispatch confirming late.
            debug!(seq = confirmation.seq, "stale confirmation discarded");
        }
    }

    /// Expire overdue pending transitions
    ///
    /// A missing confirmation is classified as unknown/assume-unsafe:
    /// the trackers revert to their last confirmed value, so the next
    /// event is decided as if the action never happened (in particular,
    /// kill-switch enablement is reconsidered).
    pub fn expire_timeouts(&mut self, now: Instant) {
        if let Some(target) = self.vpn.pending_target() {
            if let Some(seq) = self.vpn.expire(now) {
                let action = match target {
                    VpnState::Connected => Action::Connect,
                    _ => Action::Disconnect,
                };
                warn!(seq, %action, "confirmation timed out, assuming action failed");
                self.report_failure(action, FailureKind::Timeout);
            }
        }

        if let Some(target) = self.kill_switch.pending_target() {
            if let Some(seq) = self.kill_switch.expire(now) {
                let action = match target {
                    KillSwitchState::Enabled => Action::EnableKillSwitch,
                    KillSwitchState::Disabled => Action::DisableKillSwitch,
                };
                warn!(seq, %action, "confirmation timed out, assuming action failed");
                self.report_failure(action, FailureKind::Timeout);
            }
        }
    }

    /// Earliest pending confirmation deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.vpn.deadline(), self.kill_switch.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Serialized processing loop
    ///
    /// Producers (network observer, UI toggles, the subsystem's
    /// confirmations) enqueue onto `commands`; one command is processed
    /// to completion before the next is taken. Exits when the channel
    /// closes or a [`Command::Shutdown`] arrives.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        Command::Network(event) => self.handle_network_event(event),
                        Command::SetRule { name, enabled, reply } => {
                            let _ = reply.send(self.set_rule(&name, enabled));
                        }
                        Command::Confirm(confirmation) => {
                            self.handle_confirmation(confirmation)
                        }
                        Command::Snapshot { reply } => {
                            let (vpn, kill_switch) = self.current_enforcement_snapshot();
                            let _ = reply.send((self.config, vpn, kill_switch));
                        }
                        Command::Shutdown => break,
                    }
                }
                _ = sleep_until_or_forever(deadline) => {
                    self.expire_timeouts(Instant::now());
                }
            }
        }
        info!("rule controller stopped");
    }

    fn dispatch(&mut self, action: Action) {
        // Skip a re-dispatch when the same transition is already in
        // flight (a duplicate event would otherwise churn sequence
        // numbers for no behavioral difference).
        if let Some(target) = action.target_kill_switch_state() {
            if self.kill_switch.pending_target() == Some(target) {
                debug!(%action, "transition already pending, not re-dispatching");
                return;
            }
        }
        if let Some(target) = action.target_vpn_state() {
            if self.vpn.pending_target() == Some(target) {
                debug!(%action, "transition already pending, not re-dispatching");
                return;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = Instant::now() + self.confirmation_timeout;

        if let Some(target) = action.target_vpn_state() {
            let transitional = action
                .transitional_vpn_state()
                .unwrap_or(target);
            self.vpn.begin(seq, target, transitional, deadline);
        } else if let Some(target) = action.target_kill_switch_state() {
            // The firewall toggle has no intermediate state; until
            // confirmed, the switch reads as its last confirmed value.
            let transitional = self.kill_switch.confirmed();
            self.kill_switch.begin(seq, target, transitional, deadline);
        }

        info!(seq, %action, "dispatching action");
        self.executor.dispatch(ActionDispatch { seq, action });
    }

    fn finish(&mut self, action: Action, confirmation: &Confirmation, applied: bool) {
        if applied {
            let (vpn, kill_switch) = self.current_enforcement_snapshot();
            info!(seq = confirmation.seq, %action, %vpn, %kill_switch, "action confirmed");
            let _ = self
                .notifications
                .send(Notification::EnforcementChanged { vpn, kill_switch });
        } else {
            if let Outcome::Failed(reason) = &confirmation.outcome {
                warn!(seq = confirmation.seq, %action, reason, "action failed");
            }
            self.report_failure(action, FailureKind::Executor);
        }
    }

    fn report_failure(&self, action: Action, kind: FailureKind) {
        let _ = self
            .notifications
            .send(Notification::ActionFailed { action, kind });
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ChannelExecutor;
    use crate::message::ActionDispatch;
    use crate::store::MemoryStore;
    use std::sync::{Arc, Mutex};

    /// Executor that records dispatches for assertions
    #[derive(Clone, Default)]
    struct RecordingExecutor {
        dispatched: Arc<Mutex<Vec<ActionDispatch>>>,
    }

    impl RecordingExecutor {
        fn dispatched(&self) -> Vec<ActionDispatch> {
            self.dispatched.lock().unwrap().clone()
        }
    }

    impl ActionExecutor for RecordingExecutor {
        fn dispatch(&mut self, dispatch: ActionDispatch) {
            self.dispatched.lock().unwrap().push(dispatch);
        }
    }

    fn controller_with(
        store: MemoryStore,
    ) -> (
        RuleController,
        RecordingExecutor,
        mpsc::UnboundedReceiver<Notification>,
    ) {
        let executor = RecordingExecutor::default();
        let (controller, notifications) =
            RuleController::new(Box::new(store), Box::new(executor.clone())).unwrap();
        (controller, executor, notifications)
    }

    #[tokio::test]
    async fn test_connect_rule_dispatches_connect() {
        let (mut controller, executor, _notifications) = controller_with(MemoryStore::new());

        controller.set_rule("connectToVpn", true).unwrap();
        controller.handle_network_event(NetworkEvent::NetworkAvailable { trusted: true });

        let dispatched = executor.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].action, Action::Connect);
        assert_eq!(dispatched[0].seq, 1);

        // Not confirmed yet: the snapshot shows the transition in flight.
        assert_eq!(
            controller.current_enforcement_snapshot().0,
            VpnState::Connecting
        );
    }

    #[tokio::test]
    async fn test_invalid_rule_name_rejected_without_side_effects() {
        let (mut controller, executor, mut notifications) = controller_with(MemoryStore::new());

        let result = controller.set_rule("disable_kill_switch", true);
        assert!(matches!(
            result,
            Err(ControllerError::Config(ConfigError::UnknownRule(_)))
        ));

        // Store unchanged, no action, no notification.
        assert!(!controller.current_rule_snapshot().any_rule_active());
        assert!(executor.dispatched().is_empty());
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_set_rule_persists_and_republishes() {
        let (mut controller, _executor, mut notifications) = controller_with(MemoryStore::new());

        let snapshot = controller.set_rule("enableKillSwitch", true).unwrap();
        assert!(snapshot.enable_kill_switch_on_network_change);
        assert_eq!(controller.current_rule_snapshot(), snapshot);
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::RulesChanged(snapshot)
        );
    }

    #[tokio::test]
    async fn test_confirmed_connect_updates_snapshot() {
        let (mut controller, executor, mut notifications) = controller_with(MemoryStore::new());

        controller.set_rule("connectToVpn", true).unwrap();
        let _ = notifications.try_recv();
        controller.handle_network_event(NetworkEvent::NetworkChanged);

        let seq = executor.dispatched()[0].seq;
        controller.handle_confirmation(Confirmation::completed(seq));

        assert_eq!(
            controller.current_enforcement_snapshot(),
            (VpnState::Connected, KillSwitchState::Disabled)
        );
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::EnforcementChanged {
                vpn: VpnState::Connected,
                kill_switch: KillSwitchState::Disabled
            }
        );
    }

    #[tokio::test]
    async fn test_failed_connect_does_not_claim_connected() {
        let (mut controller, executor, mut notifications) = controller_with(MemoryStore::new());

        controller.set_rule("connectToVpn", true).unwrap();
        let _ = notifications.try_recv();
        controller.handle_network_event(NetworkEvent::NetworkChanged);

        let seq = executor.dispatched()[0].seq;
        controller.handle_confirmation(Confirmation::failed(seq, "tunnel failed to establish"));

        assert_eq!(
            controller.current_enforcement_snapshot().0,
            VpnState::Disconnected
        );
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::ActionFailed {
                action: Action::Connect,
                kind: FailureKind::Executor
            }
        );
    }

    #[tokio::test]
    async fn test_out_of_order_confirmation_fenced_at_controller() {
        let (mut controller, executor, _notifications) = controller_with(MemoryStore::new());

        // Connect (seq=1) dispatched on network change...
        controller.set_rule("connectToVpn", true).unwrap();
        controller.handle_network_event(NetworkEvent::NetworkChanged);

        // ...then the user flips to disconnect-on-change and a new event
        // supersedes the outstanding connect with Disconnect (seq=2).
        controller.set_rule("connectToVpn", false).unwrap();
        controller.set_rule("disconnectFromVpn", true).unwrap();
        controller.handle_network_event(NetworkEvent::NetworkChanged);

        let dispatched = executor.dispatched();
        assert_eq!(dispatched[0].action, Action::Connect);
        assert_eq!(dispatched[1].action, Action::Disconnect);

        // seq=1's confirmation arrives after seq=2 was requested: fenced.
        controller.handle_confirmation(Confirmation::completed(dispatched[0].seq));
        assert_ne!(
            controller.current_enforcement_snapshot().0,
            VpnState::Connected
        );

        // Only seq=2's outcome lands.
        controller.handle_confirmation(Confirmation::completed(dispatched[1].seq));
        assert_eq!(
            controller.current_enforcement_snapshot().0,
            VpnState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_duplicate_event_does_not_redispatch_pending_toggle() {
        let (mut controller, executor, _notifications) = controller_with(MemoryStore::new());

        controller.set_rule("enableKillSwitch", true).unwrap();
        controller.handle_network_event(NetworkEvent::NetworkChanged);
        controller.handle_network_event(NetworkEvent::NetworkChanged);

        // The second event sees the same pending enable and skips it.
        assert_eq!(executor.dispatched().len(), 1);
        assert_eq!(executor.dispatched()[0].action, Action::EnableKillSwitch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout_reverts_and_reconsiders() {
        let (controller, executor, mut notifications) = controller_with(MemoryStore::new());
        let mut controller = controller.with_confirmation_timeout(Duration::from_secs(5));

        controller.set_rule("connectToVpn", true).unwrap();
        let _ = notifications.try_recv();
        controller.handle_network_event(NetworkEvent::NetworkChanged);
        assert_eq!(executor.dispatched().len(), 1);

        // No confirmation arrives within the bound.
        tokio::time::advance(Duration::from_secs(6)).await;
        controller.expire_timeouts(Instant::now());

        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::ActionFailed {
                action: Action::Connect,
                kind: FailureKind::Timeout
            }
        );
        // Fail-safe: assume not-connected.
        assert_eq!(
            controller.current_enforcement_snapshot().0,
            VpnState::Disconnected
        );

        // The next event is decided against the reverted state and
        // re-emits the connect.
        controller.handle_network_event(NetworkEvent::NetworkChanged);
        let dispatched = executor.dispatched();
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[1].action, Action::Connect);
        assert!(dispatched[1].seq > dispatched[0].seq);

        // The long-lost confirmation for the expired dispatch is fenced.
        controller.handle_confirmation(Confirmation::completed(dispatched[0].seq));
        assert_eq!(
            controller.current_enforcement_snapshot().0,
            VpnState::Connecting
        );
    }

    #[tokio::test]
    async fn test_network_lost_enables_kill_switch_via_loop() {
        let store = MemoryStore::new(); // global kill switch on by default
        let (executor, mut os_rx) = ChannelExecutor::new();
        let (controller, mut notifications) =
            RuleController::new(Box::new(store), Box::new(executor)).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(controller.run(rx));

        tx.send(Command::Network(NetworkEvent::NetworkLost)).unwrap();

        let dispatch = os_rx.recv().await.unwrap();
        assert_eq!(dispatch.action, Action::EnableKillSwitch);

        // The subsystem confirms; the snapshot reflects the new state.
        tx.send(Command::Confirm(Confirmation::completed(dispatch.seq)))
            .unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Snapshot { reply: reply_tx }).unwrap();
        let (_config, vpn, kill_switch) = reply_rx.await.unwrap();
        assert_eq!(vpn, VpnState::Disconnected);
        assert_eq!(kill_switch, KillSwitchState::Enabled);

        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::EnforcementChanged {
                vpn: VpnState::Disconnected,
                kill_switch: KillSwitchState::Enabled
            }
        );

        tx.send(Command::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_set_rule_through_loop() {
        let (executor, _os_rx) = ChannelExecutor::new();
        let (controller, _notifications) =
            RuleController::new(Box::new(MemoryStore::new()), Box::new(executor)).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(controller.run(rx));

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::SetRule {
            name: "disconnectFromVpn".to_string(),
            enabled: true,
            reply: reply_tx,
        })
        .unwrap();
        let snapshot = reply_rx.await.unwrap().unwrap();
        assert!(snapshot.disconnect_on_network_change);

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::SetRule {
            name: "notARule".to_string(),
            enabled: true,
            reply: reply_tx,
        })
        .unwrap();
        assert!(reply_rx.await.unwrap().is_err());

        drop(tx);
        handle.await.unwrap();
    }
}
