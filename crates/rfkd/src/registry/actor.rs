//! Registry actor - owns all device, lease and session state.
//!
//! The RegistryActor is the single owner of daemon state. It receives
//! commands via an mpsc channel, fans device events out through the
//! event bus, and sends hardware commands to attached adapters via
//! broadcast.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rfk_core::{
    Device, DeviceType, HardwareCommand, HardwareReport, InhibitCookie, KillswitchState,
    ObjectPath, RfKey,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::arbiter::{InhibitArbiter, Release};
use super::bus::EventBus;
use super::commands::{
    DeviceEvent, DisconnectReason, InhibitStatus, RegistryCommand, RegistryError, SessionId,
};
use super::devices::{DeviceDelta, DeviceTable};
use super::RegistryOptions;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all daemon state.
///
/// Implements the actor pattern: receives commands via mpsc channel and
/// processes them sequentially. Because every mutation happens in this
/// one task, all sessions observe events in the same order.
///
/// # Ownership
///
/// The actor owns:
/// - `devices`: the device table, with pending soft-block requests
/// - `arbiter`: inhibit leases
/// - `bus`: one delivery queue per session
/// - `sessions`: connected sessions and when they connected
/// - `killswitches`: last published aggregate state per device type
/// - `flight`: flight mode and the per-type blocks it must restore
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    devices: DeviceTable,
    arbiter: InhibitArbiter,
    bus: EventBus,
    sessions: HashMap<SessionId, DateTime<Utc>>,
    next_session: u64,
    killswitches: HashMap<DeviceType, KillswitchState>,
    flight: FlightMode,

    /// Outbound requests for hardware adapters
    hardware_publisher: broadcast::Sender<HardwareCommand>,

    options: RegistryOptions,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `hardware_publisher` - Broadcast channel for hardware commands
    /// * `options` - Queue depth and key/sync policy
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        hardware_publisher: broadcast::Sender<HardwareCommand>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            receiver,
            devices: DeviceTable::new(),
            arbiter: InhibitArbiter::new(),
            bus: EventBus::new(options.queue_depth),
            sessions: HashMap::new(),
            next_session: 1,
            killswitches: HashMap::new(),
            flight: FlightMode::default(),
            hardware_publisher,
            options,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(
            queue_depth = self.bus.depth(),
            key_control = self.options.key_control,
            force_sync = self.options.force_sync,
            master_key = self.options.master_key,
            strict_flight_mode = self.options.strict_flight_mode,
            "Registry actor starting"
        );

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            devices = self.devices.len(),
            sessions = self.sessions.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Connect { respond_to } => {
                let result = self.handle_connect();
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Disconnect {
                session,
                respond_to,
            } => {
                let result = self.teardown_session(session, DisconnectReason::Explicit);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Enumerate { respond_to } => {
                let _ = respond_to.send(self.devices.enumerate());
            }
            RegistryCommand::ApplyHardwareEvent { report, respond_to } => {
                let result = self.handle_hardware_event(report);
                let _ = respond_to.send(result);
            }
            RegistryCommand::KeyPressed {
                keycode,
                respond_to,
            } => {
                let result = self.handle_key_pressed(keycode);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RequestSoftBlock {
                object_path,
                block,
                respond_to,
            } => {
                let result = self.handle_soft_block(&object_path, block);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RequestTypeBlock {
                device_type,
                block,
                respond_to,
            } => {
                let result = self.handle_type_block(device_type, block);
                let _ = respond_to.send(result);
            }
            RegistryCommand::FlightMode { block, respond_to } => {
                let result = self.handle_flight_mode(block);
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetKillswitchState {
                device_type,
                respond_to,
            } => {
                let _ = respond_to.send(self.devices.killswitch_state(device_type));
            }
            RegistryCommand::Inhibit {
                session,
                reason,
                respond_to,
            } => {
                let result = self.handle_inhibit(session, reason);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Uninhibit {
                session,
                cookie,
                respond_to,
            } => {
                let result = self.handle_uninhibit(session, cookie);
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetInhibitStatus { respond_to } => {
                let _ = respond_to.send(InhibitStatus {
                    inhibited: self.arbiter.is_inhibited(),
                    leases: self.arbiter.lease_count(),
                });
            }
            RegistryCommand::GetSessionCount { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
        }
    }

    // ========================================================================
    // Session Handlers
    // ========================================================================

    fn handle_connect(&mut self) -> (SessionId, mpsc::Receiver<DeviceEvent>) {
        let session = SessionId::new(self.next_session);
        self.next_session = self.next_session.saturating_add(1);

        let events = self.bus.enroll(session);
        self.sessions.insert(session, Utc::now());

        if self.sessions.len() == 1 {
            info!("First client connected");
        }
        info!(
            session = %session,
            sessions = self.sessions.len(),
            "Session connected"
        );

        (session, events)
    }

    /// Removes a session, its queue and its leases.
    ///
    /// Idempotent: returns false if the session was already gone.
    fn teardown_session(&mut self, session: SessionId, reason: DisconnectReason) -> bool {
        let connected_at = self.sessions.remove(&session);
        self.bus.unenroll(session);

        let (released, state) = self.arbiter.release_session(session);
        for lease in &released {
            info!(
                session = %session,
                cookie = %lease.cookie,
                reason = %lease.reason,
                held_secs = (Utc::now() - lease.created_at).num_seconds(),
                "Releasing inhibit lease of departed session"
            );
        }

        let Some(connected_at) = connected_at else {
            debug!(session = %session, "Disconnect for unknown session ignored");
            return false;
        };

        let duration_secs = Utc::now()
            .signed_duration_since(connected_at)
            .num_seconds();
        match reason {
            DisconnectReason::Explicit => info!(
                session = %session,
                duration_secs,
                "Session disconnected"
            ),
            DisconnectReason::Overflow | DisconnectReason::ReceiverDropped => warn!(
                session = %session,
                duration_secs,
                reason = %reason,
                "Dropping session"
            ),
        }

        if self.sessions.is_empty() {
            info!("Last client disconnected");
        }

        if state == Some(Release::Resumed) {
            self.resync();
        }

        true
    }

    // ========================================================================
    // Hardware Handlers
    // ========================================================================

    fn handle_hardware_event(&mut self, report: HardwareReport) -> Option<DeviceDelta> {
        let delta = match self.devices.apply_report(&report) {
            Ok(Some(delta)) => delta,
            Ok(None) => {
                debug!(
                    op = %report.op,
                    device_type = %report.device_type,
                    name = %report.name,
                    "Hardware report changed nothing"
                );
                return None;
            }
            Err(reason) => {
                warn!(
                    op = %report.op,
                    device_type = %report.device_type,
                    name = %report.name,
                    reason = %reason,
                    "Ignoring hardware report"
                );
                return None;
            }
        };

        debug!(
            object_path = %delta.device().object_path,
            soft = delta.device().soft,
            hard = delta.device().hard,
            "Hardware report applied"
        );

        let device_type = delta.device().device_type;
        self.publish(DeviceEvent::from(delta.clone()));
        self.refresh_killswitch(device_type);

        if let DeviceDelta::Added(device) = &delta {
            self.force_sync(device);
        }

        Some(delta)
    }

    /// Re-asserts the registry's soft state onto a newly added device.
    fn force_sync(&mut self, device: &Device) {
        if !self.options.force_sync || device.platform {
            return;
        }
        if self.arbiter.is_inhibited() {
            debug!(object_path = %device.object_path, "Inhibited, skipping force sync");
            return;
        }
        self.forward_to_hardware(device);
    }

    fn handle_key_pressed(&mut self, keycode: u32) -> bool {
        let Some(key) = RfKey::from_code(keycode) else {
            debug!(keycode, "Ignoring non-RF key");
            return false;
        };

        info!(key = %key, keycode, "RF key pressed");
        self.publish(DeviceEvent::KeyPressed(keycode));

        if !self.options.key_control {
            return true;
        }
        if self.arbiter.is_inhibited() {
            info!(key = %key, "Key control suspended by inhibit");
            return true;
        }

        if key == RfKey::Rfkill && self.options.master_key {
            let block = !self.flight.enabled;
            self.handle_flight_mode(block);
        } else {
            self.toggle_type(key.device_type());
        }
        true
    }

    /// Blocks every device of the type if any is unblocked, otherwise
    /// unblocks them all.
    fn toggle_type(&mut self, device_type: DeviceType) {
        let targets = self.devices.paths_of_type(device_type);
        if targets.is_empty() {
            debug!(device_type = %device_type, "No devices to toggle");
            return;
        }

        let block = self.devices.devices_of_type(device_type).any(|d| !d.soft);
        info!(device_type = %device_type, block, "Toggling devices");

        for path in targets {
            if let Err(e) = self.apply_soft_block(&path, block) {
                warn!(object_path = %path, error = %e, "Toggle failed");
            }
        }
    }

    // ========================================================================
    // Client Request Handlers
    // ========================================================================

    fn handle_soft_block(
        &mut self,
        object_path: &ObjectPath,
        block: bool,
    ) -> Result<Device, RegistryError> {
        let result = self.apply_soft_block(object_path, block);
        if let Err(e) = &result {
            debug!(object_path = %object_path, error = %e, "Soft block request rejected");
        }
        result
    }

    /// Blocks every real type, or restores the blocks held before.
    ///
    /// Entering remembers which types were already soft blocked so that
    /// leaving keeps them blocked. With `strict_flight_mode` WWAN is
    /// never remembered. Types without devices keep their memory.
    fn handle_flight_mode(&mut self, block: bool) -> Vec<Device> {
        let mut applied = Vec::new();

        for device_type in DeviceType::REAL {
            let paths = self.devices.paths_of_type(device_type);
            if paths.is_empty() {
                continue;
            }

            let initial = self.devices.killswitch_state(device_type);
            let remembered = self.flight.remembered(device_type);
            let target = block || remembered;

            for path in paths {
                match self.apply_soft_block(&path, target) {
                    Ok(device) => applied.push(device),
                    Err(e) => warn!(object_path = %path, error = %e, "Flight mode block failed"),
                }
            }

            let strict_wwan = self.options.strict_flight_mode && device_type == DeviceType::Wwan;
            let keep = block && initial == KillswitchState::SoftBlocked && !strict_wwan;
            self.flight.remember(device_type, keep);
        }

        self.flight.enabled = block;
        info!(
            enabled = block,
            devices = applied.len(),
            "Flight mode set"
        );
        applied
    }

    fn handle_type_block(&mut self, device_type: DeviceType, block: bool) -> Vec<Device> {
        self.devices
            .paths_of_type(device_type)
            .into_iter()
            .filter_map(|path| self.apply_soft_block(&path, block).ok())
            .collect()
    }

    /// Applies a soft-block change, or defers it while inhibited.
    fn apply_soft_block(
        &mut self,
        object_path: &ObjectPath,
        block: bool,
    ) -> Result<Device, RegistryError> {
        if self.arbiter.is_inhibited() {
            let device = self.devices.defer_soft(object_path, block)?;
            info!(
                object_path = %object_path,
                block,
                leases = self.arbiter.lease_count(),
                "Inhibited, deferring soft block"
            );
            return Ok(device);
        }

        let (device, changed) = self.devices.set_soft(object_path, block)?;
        if changed {
            self.publish(DeviceEvent::Changed(device.clone()));
            self.refresh_killswitch(device.device_type);
        }
        self.forward_to_hardware(&device);
        Ok(device)
    }

    fn handle_inhibit(
        &mut self,
        session: SessionId,
        reason: String,
    ) -> Result<InhibitCookie, RegistryError> {
        if !self.sessions.contains_key(&session) {
            return Err(RegistryError::UnknownSession(session));
        }

        let was_inhibited = self.arbiter.is_inhibited();
        let cookie = self.arbiter.inhibit(session, reason.clone());
        info!(
            session = %session,
            cookie = %cookie,
            reason = %reason,
            leases = self.arbiter.lease_count(),
            "Inhibit lease granted"
        );
        if !was_inhibited {
            info!("Policy suspended");
        }
        Ok(cookie)
    }

    fn handle_uninhibit(
        &mut self,
        session: SessionId,
        cookie: InhibitCookie,
    ) -> Result<(), RegistryError> {
        let state = self.arbiter.uninhibit(session, cookie)?;
        info!(
            session = %session,
            cookie = %cookie,
            leases = self.arbiter.lease_count(),
            "Inhibit lease released"
        );
        if state == Release::Resumed {
            self.resync();
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Applies soft-block requests held back during inhibition.
    fn resync(&mut self) {
        let pending = self.devices.take_pending();
        info!(pending = pending.len(), "Policy resumed");

        for (path, block) in pending {
            if let Err(e) = self.apply_soft_block(&path, block) {
                debug!(object_path = %path, error = %e, "Pending soft block dropped");
            }
        }
    }

    /// Publishes the aggregate state of a type if it moved since the
    /// last publication.
    fn refresh_killswitch(&mut self, device_type: DeviceType) {
        let state = self.devices.killswitch_state(device_type);
        let previous = self
            .killswitches
            .insert(device_type, state)
            .unwrap_or(KillswitchState::NoAdapter);
        if previous == state {
            return;
        }

        debug!(
            device_type = %device_type,
            from = %previous,
            to = %state,
            "Killswitch state changed"
        );
        self.publish(DeviceEvent::KillswitchChanged { device_type, state });
    }

    fn publish(&mut self, event: DeviceEvent) {
        let outcome = self.bus.publish(&event);
        for session in outcome.overflowed {
            self.teardown_session(session, DisconnectReason::Overflow);
        }
        for session in outcome.closed {
            self.teardown_session(session, DisconnectReason::ReceiverDropped);
        }
    }

    fn forward_to_hardware(&self, device: &Device) {
        let command = HardwareCommand::set_soft_block(device);
        if self.hardware_publisher.send(command).is_err() {
            // No adapter attached
            debug!(
                object_path = %device.object_path,
                soft = device.soft,
                "No hardware adapter attached, command dropped"
            );
        }
    }

    /// Returns whether flight mode is on (for testing).
    #[cfg(test)]
    pub fn flight_mode(&self) -> bool {
        self.flight.enabled
    }

    /// Returns the number of known devices (for testing).
    #[cfg(test)]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Returns the number of connected sessions (for testing).
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Flight mode flag plus the soft blocks to keep when it ends.
#[derive(Debug, Default)]
struct FlightMode {
    enabled: bool,
    prev_soft: HashMap<DeviceType, bool>,
}

impl FlightMode {
    fn remembered(&self, device_type: DeviceType) -> bool {
        self.prev_soft.get(&device_type).copied().unwrap_or(false)
    }

    fn remember(&mut self, device_type: DeviceType, soft: bool) {
        self.prev_soft.insert(device_type, soft);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfk_core::{KillswitchState, KEY_BLUETOOTH, KEY_RFKILL, KEY_WLAN};
    use tokio::sync::oneshot;

    fn create_actor_with(
        options: RegistryOptions,
    ) -> (RegistryActor, broadcast::Receiver<HardwareCommand>) {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (hw_tx, hw_rx) = broadcast::channel(64);
        let actor = RegistryActor::new(cmd_rx, hw_tx, options);
        (actor, hw_rx)
    }

    fn create_actor() -> (RegistryActor, broadcast::Receiver<HardwareCommand>) {
        create_actor_with(RegistryOptions::default())
    }

    fn connect(actor: &mut RegistryActor) -> (SessionId, mpsc::Receiver<DeviceEvent>) {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Connect { respond_to: tx });
        rx.try_recv().unwrap()
    }

    fn report(actor: &mut RegistryActor, report: HardwareReport) -> Option<DeviceDelta> {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::ApplyHardwareEvent {
            report,
            respond_to: tx,
        });
        rx.try_recv().unwrap()
    }

    fn soft_block(
        actor: &mut RegistryActor,
        path: ObjectPath,
        block: bool,
    ) -> Result<Device, RegistryError> {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::RequestSoftBlock {
            object_path: path,
            block,
            respond_to: tx,
        });
        rx.try_recv().unwrap()
    }

    fn inhibit(actor: &mut RegistryActor, session: SessionId) -> InhibitCookie {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Inhibit {
            session,
            reason: "test".to_string(),
            respond_to: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn uninhibit(
        actor: &mut RegistryActor,
        session: SessionId,
        cookie: InhibitCookie,
    ) -> Result<(), RegistryError> {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Uninhibit {
            session,
            cookie,
            respond_to: tx,
        });
        rx.try_recv().unwrap()
    }

    fn disconnect(actor: &mut RegistryActor, session: SessionId) -> bool {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Disconnect {
            session,
            respond_to: tx,
        });
        rx.try_recv().unwrap()
    }

    fn key(actor: &mut RegistryActor, keycode: u32) -> bool {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::KeyPressed {
            keycode,
            respond_to: tx,
        });
        rx.try_recv().unwrap()
    }

    #[test]
    fn test_added_report_is_published() {
        let (mut actor, _hw) = create_actor();
        let (_, mut events) = connect(&mut actor);

        let delta = report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        assert!(matches!(delta, Some(DeviceDelta::Added(_))));
        assert_eq!(actor.device_count(), 1);

        match events.try_recv().unwrap() {
            DeviceEvent::Added(device) => {
                assert_eq!(device.index, 0);
                assert_eq!(device.name, "phy0");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unchanged_report_publishes_nothing() {
        let (mut actor, _hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        let (_, mut events) = connect(&mut actor);

        assert!(report(&mut actor, HardwareReport::changed(DeviceType::Wlan, "phy0")).is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_ignored_report_changes_nothing() {
        let (mut actor, _hw) = create_actor();
        assert!(report(&mut actor, HardwareReport::removed(DeviceType::Wlan, "ghost")).is_none());
        assert_eq!(actor.device_count(), 0);
    }

    #[test]
    fn test_soft_block_publishes_and_forwards() {
        let (mut actor, mut hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        let (_, mut events) = connect(&mut actor);

        let device = soft_block(&mut actor, ObjectPath::for_index(0), true).unwrap();
        assert!(device.soft);

        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Changed(ref d) if d.soft));
        assert_eq!(
            events.try_recv().unwrap(),
            DeviceEvent::KillswitchChanged {
                device_type: DeviceType::Wlan,
                state: KillswitchState::SoftBlocked,
            }
        );
        let cmd = hw.try_recv().unwrap();
        assert_eq!(cmd, HardwareCommand::set_soft_block(&device));
    }

    #[test]
    fn test_first_device_of_a_type_publishes_killswitch() {
        let (mut actor, _hw) = create_actor();
        let (_, mut events) = connect(&mut actor);

        report(&mut actor, HardwareReport::added(DeviceType::Gps, "gps0").hard(true));
        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Added(_)));
        assert_eq!(
            events.try_recv().unwrap(),
            DeviceEvent::KillswitchChanged {
                device_type: DeviceType::Gps,
                state: KillswitchState::HardBlocked,
            }
        );

        // A second hard-blocked GPS leaves the aggregate where it was
        report(&mut actor, HardwareReport::added(DeviceType::Gps, "gps1").hard(true));
        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Added(_)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_soft_block_unknown_path() {
        let (mut actor, _hw) = create_actor();
        let err = soft_block(&mut actor, ObjectPath::for_index(5), true).unwrap_err();
        assert_eq!(err, RegistryError::DeviceNotFound(ObjectPath::for_index(5)));
    }

    #[test]
    fn test_inhibit_requires_connected_session() {
        let (mut actor, _hw) = create_actor();
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Inhibit {
            session: SessionId::new(99),
            reason: String::new(),
            respond_to: tx,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(RegistryError::UnknownSession(SessionId::new(99)))
        );
    }

    #[test]
    fn test_inhibited_soft_block_is_deferred_then_resynced() {
        let (mut actor, mut hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Bluetooth, "hci0"));
        let (session, mut events) = connect(&mut actor);
        let cookie = inhibit(&mut actor, session);

        // Deferred: returned device carries the requested value, nothing else happens
        let device = soft_block(&mut actor, ObjectPath::for_index(0), true).unwrap();
        assert!(device.soft);
        assert!(events.try_recv().is_err());
        assert!(hw.try_recv().is_err());

        // Stored state is untouched while inhibited
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Enumerate { respond_to: tx });
        assert!(!rx.try_recv().unwrap()[0].soft);

        uninhibit(&mut actor, session, cookie).unwrap();

        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Changed(ref d) if d.soft));
        assert!(matches!(
            hw.try_recv().unwrap(),
            HardwareCommand::SetSoftBlock { soft: true, .. }
        ));
    }

    #[test]
    fn test_uninhibit_wrong_session_keeps_lease() {
        let (mut actor, _hw) = create_actor();
        let (a, _ea) = connect(&mut actor);
        let (b, _eb) = connect(&mut actor);
        let cookie = inhibit(&mut actor, a);

        let err = uninhibit(&mut actor, b, cookie).unwrap_err();
        assert_eq!(err, RegistryError::Unauthorized { cookie, session: b });

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetInhibitStatus { respond_to: tx });
        assert_eq!(
            rx.try_recv().unwrap(),
            InhibitStatus {
                inhibited: true,
                leases: 1
            }
        );
    }

    #[test]
    fn test_disconnect_releases_leases_and_resyncs() {
        let (mut actor, mut hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        let (holder, _holder_events) = connect(&mut actor);
        let (_, mut watcher) = connect(&mut actor);
        inhibit(&mut actor, holder);

        soft_block(&mut actor, ObjectPath::for_index(0), true).unwrap();
        assert!(hw.try_recv().is_err());

        assert!(disconnect(&mut actor, holder));
        assert_eq!(actor.session_count(), 1);

        assert!(matches!(watcher.try_recv().unwrap(), DeviceEvent::Changed(ref d) if d.soft));
        assert!(hw.try_recv().is_ok());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut actor, _hw) = create_actor();
        let (session, _events) = connect(&mut actor);

        assert!(disconnect(&mut actor, session));
        assert!(!disconnect(&mut actor, session));
        assert!(!disconnect(&mut actor, SessionId::new(1234)));
        assert_eq!(actor.session_count(), 0);
    }

    #[test]
    fn test_overflowing_session_is_dropped_with_leases() {
        let options = RegistryOptions {
            queue_depth: 1,
            ..RegistryOptions::default()
        };
        let (mut actor, _hw) = create_actor_with(options);
        let (slow, _slow_events) = connect(&mut actor);
        inhibit(&mut actor, slow);

        key(&mut actor, KEY_WLAN);
        assert_eq!(actor.session_count(), 1);
        key(&mut actor, KEY_WLAN);
        assert_eq!(actor.session_count(), 0);

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetInhibitStatus { respond_to: tx });
        assert!(!rx.try_recv().unwrap().inhibited);
    }

    #[test]
    fn test_dropped_receiver_tears_session_down() {
        let (mut actor, _hw) = create_actor();
        let (_, events) = connect(&mut actor);
        drop(events);

        key(&mut actor, KEY_BLUETOOTH);
        assert_eq!(actor.session_count(), 0);
    }

    #[test]
    fn test_non_rf_key_is_ignored() {
        let (mut actor, _hw) = create_actor();
        let (_, mut events) = connect(&mut actor);

        assert!(!key(&mut actor, 30));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_rf_key_toggles_type() {
        let (mut actor, mut hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy1").soft(true));
        report(&mut actor, HardwareReport::added(DeviceType::Bluetooth, "hci0"));
        let (_, mut events) = connect(&mut actor);

        // One WLAN device unblocked: block all WLAN
        assert!(key(&mut actor, KEY_WLAN));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::KeyPressed(KEY_WLAN));
        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Changed(ref d) if d.index == 0 && d.soft));
        // phy1 already blocked: no event, still forwarded
        assert!(events.try_recv().is_err());
        assert_eq!(hw.try_recv().unwrap().object_path(), &ObjectPath::for_index(0));
        assert_eq!(hw.try_recv().unwrap().object_path(), &ObjectPath::for_index(1));

        // All blocked now: unblock all
        key(&mut actor, KEY_WLAN);
        let _ = events.try_recv(); // KeyPressed
        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Changed(ref d) if !d.soft));
        assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Changed(ref d) if !d.soft));
    }

    #[test]
    fn test_rfkill_key_toggles_everything() {
        let (mut actor, _hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        report(&mut actor, HardwareReport::added(DeviceType::Bluetooth, "hci0"));

        key(&mut actor, KEY_RFKILL);

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Enumerate { respond_to: tx });
        assert!(rx.try_recv().unwrap().iter().all(|d| d.soft));
    }

    #[test]
    fn test_key_control_suspended_while_inhibited() {
        let (mut actor, mut hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        let (session, mut events) = connect(&mut actor);
        inhibit(&mut actor, session);

        assert!(key(&mut actor, KEY_WLAN));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::KeyPressed(KEY_WLAN));
        assert!(events.try_recv().is_err());
        assert!(hw.try_recv().is_err());
    }

    #[test]
    fn test_key_control_disabled() {
        let options = RegistryOptions {
            key_control: false,
            ..RegistryOptions::default()
        };
        let (mut actor, mut hw) = create_actor_with(options);
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));

        assert!(key(&mut actor, KEY_WLAN));
        assert!(hw.try_recv().is_err());
    }

    #[test]
    fn test_force_sync_reasserts_new_devices() {
        let options = RegistryOptions {
            force_sync: true,
            ..RegistryOptions::default()
        };
        let (mut actor, mut hw) = create_actor_with(options);

        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0").soft(true));
        assert!(matches!(
            hw.try_recv().unwrap(),
            HardwareCommand::SetSoftBlock { soft: true, .. }
        ));

        // Platform switches are left alone
        report(
            &mut actor,
            HardwareReport::added(DeviceType::Wlan, "ideapad_wlan").platform(true),
        );
        assert!(hw.try_recv().is_err());
    }

    #[test]
    fn test_type_block_selects_matching_devices() {
        let (mut actor, _hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        report(&mut actor, HardwareReport::added(DeviceType::Bluetooth, "hci0"));

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::RequestTypeBlock {
            device_type: DeviceType::Bluetooth,
            block: true,
            respond_to: tx,
        });
        let devices = rx.try_recv().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, DeviceType::Bluetooth);

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetKillswitchState {
            device_type: DeviceType::Bluetooth,
            respond_to: tx,
        });
        assert_eq!(rx.try_recv().unwrap(), KillswitchState::SoftBlocked);
    }

    fn flight_mode(actor: &mut RegistryActor, block: bool) -> Vec<Device> {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::FlightMode {
            block,
            respond_to: tx,
        });
        rx.try_recv().unwrap()
    }

    fn soft_states(actor: &mut RegistryActor) -> Vec<bool> {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Enumerate { respond_to: tx });
        rx.try_recv().unwrap().iter().map(|d| d.soft).collect()
    }

    #[test]
    fn test_flight_mode_remembers_blocked_types() {
        let (mut actor, mut hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        report(&mut actor, HardwareReport::added(DeviceType::Bluetooth, "hci0").soft(true));

        let applied = flight_mode(&mut actor, true);
        assert_eq!(applied.len(), 2);
        assert!(actor.flight_mode());
        assert_eq!(soft_states(&mut actor), vec![true, true]);
        assert_eq!(hw.try_recv().unwrap().object_path(), &ObjectPath::for_index(0));
        assert_eq!(hw.try_recv().unwrap().object_path(), &ObjectPath::for_index(1));

        flight_mode(&mut actor, false);
        assert!(!actor.flight_mode());
        assert_eq!(soft_states(&mut actor), vec![false, true]);
    }

    #[test]
    fn test_flight_mode_skips_types_without_devices() {
        let (mut actor, _hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0").soft(true));
        flight_mode(&mut actor, true);

        // A type first seen during flight mode has nothing to restore
        report(&mut actor, HardwareReport::added(DeviceType::Bluetooth, "hci0"));
        flight_mode(&mut actor, false);
        assert_eq!(soft_states(&mut actor), vec![true, false]);
    }

    #[test]
    fn test_flight_mode_while_inhibited_is_deferred() {
        let (mut actor, mut hw) = create_actor();
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));
        let (session, _events) = connect(&mut actor);
        let cookie = inhibit(&mut actor, session);

        let applied = flight_mode(&mut actor, true);
        assert!(applied[0].soft);
        assert_eq!(soft_states(&mut actor), vec![false]);
        assert!(hw.try_recv().is_err());

        uninhibit(&mut actor, session, cookie).unwrap();
        assert_eq!(soft_states(&mut actor), vec![true]);
    }

    #[test]
    fn test_master_key_enters_and_leaves_flight_mode() {
        let options = RegistryOptions {
            master_key: true,
            ..RegistryOptions::default()
        };
        let (mut actor, _hw) = create_actor_with(options);
        report(&mut actor, HardwareReport::added(DeviceType::Wlan, "phy0"));

        assert!(key(&mut actor, KEY_RFKILL));
        assert!(actor.flight_mode());
        assert_eq!(soft_states(&mut actor), vec![true]);

        key(&mut actor, KEY_RFKILL);
        assert!(!actor.flight_mode());
        assert_eq!(soft_states(&mut actor), vec![false]);

        // Type keys still toggle their type only
        key(&mut actor, KEY_WLAN);
        assert!(!actor.flight_mode());
        assert_eq!(soft_states(&mut actor), vec![true]);
    }

    #[tokio::test]
    async fn test_run_processes_until_senders_dropped() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (hw_tx, _hw_rx) = broadcast::channel(16);
        let actor = RegistryActor::new(cmd_rx, hw_tx, RegistryOptions::default());
        let task = tokio::spawn(actor.run());

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(RegistryCommand::GetSessionCount { respond_to: tx })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), 0);

        drop(cmd_tx);
        task.await.unwrap();
    }
}
