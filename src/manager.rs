//! Main [`DeviceManager`] implementation.
//!
//! The manager combines the transport, the device registry and the event
//! dispatcher into one interface. It owns the background tasks that ingest
//! transport events, run the out-of-range sweep and listen for notifications
//! on connected devices.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::ota::{FirmwareUpdateHandle, FirmwareUpdateOptions, REQUIRED_CHARACTERISTICS};
use crate::protocol::Advertisement;
use crate::protocol::command::{
    CellularQuery, CommandKind, Data3Notification, DeviceCommand, EncodedWrite, QueryResponse,
    classify_data3, is_verified_hardware_revision, parse_battery_level, parse_debug_mode, parse_query_response,
    parse_revision,
};
use crate::protocol::uuids::DATA3;
use crate::registry::Registry;
use crate::session::{
    DeferredOp, DeviceSession, DeviceSnapshot, ReadKind, RequestKind, discovery_services,
};
use crate::transport::{CentralState, Transport, TransportEvent};
use crate::types::{
    BuzzState, ChargingStatus, ConnectionState, DeviceModel, FirmwareHint, Location, LteStatus,
    MacAddress, PeripheralId, TrackingMode, Volume,
};

/// Hardware revision string together with its bootloader check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareRevision {
    /// Raw revision string.
    pub revision: String,
    /// False when the device reports bootloader firmware.
    pub verified: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_capability(model: DeviceModel, kind: CommandKind) -> Result<()> {
    let caps = model.capabilities();
    let supported = match kind {
        CommandKind::Buzz => caps.can_buzz,
        CommandKind::StopBuzz => caps.can_stop_buzz,
        CommandKind::Reboot => caps.can_reboot,
        CommandKind::SetVolume => caps.can_set_volume,
        CommandKind::SetTrackingMode | CommandKind::SetDebugMode => model.is_found(),
    };
    if supported {
        Ok(())
    } else {
        Err(Error::Unsupported {
            model,
            operation: kind.name(),
        })
    }
}

/// Keeps connection-level errors and wraps the rest as a failed write or read.
fn protocol_error(error: Error, wrap: fn(String) -> Error) -> Error {
    match error {
        Error::NotConnected
        | Error::ConnectionFailed
        | Error::Unauthorized
        | Error::UnknownDeviceState
        | Error::Timeout { .. }
        | Error::WriteFailed { .. }
        | Error::ReadFailed { .. } => error,
        other => wrap(other.to_string()),
    }
}

fn unexpected_response(query: CellularQuery) -> Error {
    Error::ReadFailed {
        message: format!("unexpected {} response", query.name()),
    }
}

struct Shared<T: ?Sized> {
    transport: Arc<T>,
    registry: RwLock<Registry>,
    dispatcher: EventDispatcher,
    config: ManagerConfig,
    listeners: Mutex<HashMap<MacAddress, JoinHandle<()>>>,
    updates: Arc<Mutex<HashSet<MacAddress>>>,
}

impl<T: Transport + ?Sized + 'static> Shared<T> {
    async fn observe(&self, advertisement: &Advertisement) {
        let events = self
            .registry
            .write()
            .await
            .observe(advertisement, Instant::now(), &self.config);
        self.dispatcher.dispatch_all(events);
    }

    async fn sweep(&self) {
        let events = self
            .registry
            .write()
            .await
            .sweep(Instant::now(), &self.config);
        self.dispatcher.dispatch_all(events);
    }

    async fn model_of(&self, mac: &MacAddress) -> Result<DeviceModel> {
        self.registry
            .read()
            .await
            .get(mac)
            .map(DeviceSession::model)
            .ok_or_else(|| Error::UnknownDevice { mac: mac.clone() })
    }

    /// Model and advertised firmware generation, for encoding commands.
    async fn command_target(
        &self,
        mac: &MacAddress,
    ) -> Result<(DeviceModel, Option<FirmwareHint>)> {
        let registry = self.registry.read().await;
        let session = registry
            .get(mac)
            .ok_or_else(|| Error::UnknownDevice { mac: mac.clone() })?;
        Ok((session.model(), session.live_state.firmware_hint))
    }

    async fn run_events(self: Arc<Self>, mut events: BoxStream<'static, TransportEvent>) {
        while let Some(event) = events.next().await {
            match event {
                TransportEvent::Advertisement(advertisement) => self.observe(&advertisement).await,
                TransportEvent::Disconnected { peripheral } => {
                    let mac = self.registry.read().await.mac_for(&peripheral).cloned();
                    if let Some(mac) = mac {
                        tracing::debug!("{} dropped its connection", mac);
                        self.finish_disconnect(&mac).await;
                    }
                }
                TransportEvent::CentralStateChanged(state) => self.on_central_state(state).await,
            }
        }
        tracing::debug!("transport event stream ended");
    }

    async fn on_central_state(&self, state: CentralState) {
        tracing::debug!("central state changed to {:?}", state);
        self.dispatcher.dispatch(Event::CentralStateChanged(state));
        if state == CentralState::PoweredOn {
            return;
        }

        let connected: Vec<MacAddress> = self
            .registry
            .read()
            .await
            .snapshots()
            .into_iter()
            .filter(|s| s.connection_state != ConnectionState::Disconnected)
            .map(|s| s.identity.mac)
            .collect();
        for mac in connected {
            self.finish_disconnect(&mac).await;
        }
    }

    async fn connect(self: &Arc<Self>, mac: &MacAddress) -> Result<()> {
        if !self.transport.central_state().await.is_authorized() {
            return Err(Error::Unauthorized);
        }

        let (peripheral, model, _connect_slot, event) = {
            let mut registry = self.registry.write().await;
            let session = registry.session_mut(mac)?;
            if session.pending.is_pending(RequestKind::Connect) {
                return Err(Error::Busy {
                    kind: RequestKind::Connect,
                });
            }
            match session.connection_state {
                ConnectionState::Connected if session.is_ready() => return Ok(()),
                ConnectionState::Disconnecting => return Err(Error::UnknownDeviceState),
                _ => {}
            }
            let slot = session.pending.register(RequestKind::Connect, None)?;
            let event = session.set_connection_state(ConnectionState::Connecting);
            (session.peripheral.clone(), session.model(), slot, event)
        };
        self.dispatcher.dispatch_all(event);

        let attempt = async {
            self.transport.connect(&peripheral).await?;
            self.transport
                .discover(&peripheral, discovery_services(model))
                .await
        };
        let characteristics: BTreeSet<Uuid> =
            match tokio::time::timeout(self.config.connect_timeout, attempt).await {
                Ok(Ok(found)) => found.into_iter().collect(),
                Ok(Err(e)) => {
                    tracing::warn!("connect to {} failed: {}", mac, e);
                    self.connect_failed(mac).await;
                    return Err(match e {
                        Error::Unauthorized => Error::Unauthorized,
                        _ => Error::ConnectionFailed,
                    });
                }
                Err(_) => {
                    tracing::warn!("connect to {} timed out", mac);
                    let _ = self.transport.disconnect(&peripheral).await;
                    self.connect_failed(mac).await;
                    return Err(Error::timeout(self.config.connect_timeout));
                }
            };

        let notifications = if model.capabilities().can_query_cellular
            && characteristics.contains(&DATA3)
        {
            match self.transport.subscribe(&peripheral, DATA3).await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    tracing::warn!("could not subscribe to {} notifications: {}", mac, e);
                    None
                }
            }
        } else {
            None
        };

        let event = {
            let mut registry = self.registry.write().await;
            let session = registry.session_mut(mac)?;
            // A disconnect or forget while connecting clears the slot.
            if !session.pending.is_pending(RequestKind::Connect) {
                return Err(Error::ConnectionFailed);
            }
            let event = session.set_connection_state(ConnectionState::Connected);
            session.characteristics = Some(characteristics.clone());
            session.pending.complete(RequestKind::Connect, Ok(Bytes::new()));
            event
        };
        tracing::debug!(
            "{} connected, {} characteristics",
            mac,
            characteristics.len()
        );

        if let Some(stream) = notifications {
            self.spawn_listener(mac.clone(), stream);
        }
        self.dispatcher.dispatch_all(event);
        self.characteristics_ready(mac, characteristics).await;
        Ok(())
    }

    async fn connect_failed(&self, mac: &MacAddress) {
        let event = {
            let mut registry = self.registry.write().await;
            let Ok(session) = registry.session_mut(mac) else {
                return;
            };
            session.pending.fail_all(|| Error::ConnectionFailed);
            session.set_connection_state(ConnectionState::Disconnected)
        };
        self.dispatcher.dispatch_all(event);
    }

    /// Announces discovery results, then runs every deferred operation.
    async fn characteristics_ready(
        self: &Arc<Self>,
        mac: &MacAddress,
        characteristics: BTreeSet<Uuid>,
    ) {
        self.dispatcher.dispatch(Event::CharacteristicsReady {
            mac: mac.clone(),
            characteristics,
        });
        self.dispatch_ready(mac).await;
    }

    async fn dispatch_ready(self: &Arc<Self>, mac: &MacAddress) {
        let (peripheral, ready) = {
            let mut registry = self.registry.write().await;
            let Ok(session) = registry.session_mut(mac) else {
                return;
            };
            let Some(characteristics) = session.characteristics.as_ref() else {
                return;
            };
            let ready = session.pending.take_ready(characteristics);
            (session.peripheral.clone(), ready)
        };

        for (kind, op) in ready {
            let shared = Arc::clone(self);
            let mac = mac.clone();
            let peripheral = peripheral.clone();
            tokio::spawn(async move { shared.execute(&mac, &peripheral, kind, op).await });
        }
    }

    async fn execute(
        &self,
        mac: &MacAddress,
        peripheral: &PeripheralId,
        kind: RequestKind,
        op: DeferredOp,
    ) {
        let timeout = self.config.command_timeout;
        let result = match op {
            DeferredOp::Write(writes) => {
                match self.write_all(mac, peripheral, kind, writes).await {
                    // The notification answers a query, not the acknowledgement.
                    Ok(()) if kind == RequestKind::Query => return,
                    result => result.map(|()| Bytes::new()),
                }
            }
            DeferredOp::Read(characteristic) => {
                let future = self.transport.read(peripheral, characteristic);
                match tokio::time::timeout(timeout, future).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(protocol_error(e, |message| Error::ReadFailed { message })),
                    Err(_) => Err(Error::timeout(timeout)),
                }
            }
        };

        if let Err(e) = &result {
            tracing::warn!("{:?} on {} failed: {}", kind, mac, e);
        }
        self.complete(mac, kind, result).await;
    }

    /// Issues `writes` in order, stopping at the first failure.
    async fn write_all(
        &self,
        mac: &MacAddress,
        peripheral: &PeripheralId,
        kind: RequestKind,
        writes: Vec<EncodedWrite>,
    ) -> Result<()> {
        let timeout = self.config.command_timeout;
        for write in writes {
            tracing::trace!("{:?} write to {} on {}", kind, write.characteristic, mac);
            let future =
                self.transport
                    .write(peripheral, write.characteristic, write.payload, write.mode);
            match tokio::time::timeout(timeout, future).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(protocol_error(e, |message| Error::WriteFailed { message }));
                }
                Err(_) => return Err(Error::timeout(timeout)),
            }
        }
        Ok(())
    }

    async fn complete(&self, mac: &MacAddress, kind: RequestKind, result: Result<Bytes>) -> bool {
        let mut registry = self.registry.write().await;
        registry
            .session_mut(mac)
            .is_ok_and(|session| session.pending.complete(kind, result))
    }

    async fn request(
        self: &Arc<Self>,
        mac: &MacAddress,
        kind: RequestKind,
        op: DeferredOp,
        timeout: Duration,
    ) -> Result<Bytes> {
        let (receiver, ready, needs_connect) = {
            let mut registry = self.registry.write().await;
            let session = registry.session_mut(mac)?;
            if session.connection_state.is_transitioning() {
                return Err(Error::ConnectionFailed);
            }
            let receiver = session.pending.register(kind, Some(op))?;
            let ready = session.is_ready();
            let needs_connect = !ready && !session.pending.is_pending(RequestKind::Connect);
            (receiver, ready, needs_connect)
        };

        if ready {
            self.dispatch_ready(mac).await;
        } else if needs_connect {
            let shared = Arc::clone(self);
            let mac = mac.clone();
            tokio::spawn(async move { shared.connect_deferred(&mac).await });
        }

        let wait = if ready {
            timeout
        } else {
            timeout + self.config.connect_timeout
        };
        match tokio::time::timeout(wait, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                if let Ok(session) = self.registry.write().await.session_mut(mac) {
                    session.pending.cancel(kind);
                }
                tracing::debug!("{:?} on {} timed out", kind, mac);
                Err(Error::timeout(wait))
            }
        }
    }

    /// Connects on behalf of deferred requests.
    async fn connect_deferred(self: &Arc<Self>, mac: &MacAddress) {
        match self.connect(mac).await {
            // Someone else may have finished connecting first.
            Ok(()) => self.dispatch_ready(mac).await,
            Err(Error::Busy { .. }) => {}
            Err(e) => {
                let unauthorized = matches!(e, Error::Unauthorized);
                let mut registry = self.registry.write().await;
                if let Ok(session) = registry.session_mut(mac) {
                    session.pending.fail_all(|| {
                        if unauthorized {
                            Error::Unauthorized
                        } else {
                            Error::ConnectionFailed
                        }
                    });
                }
            }
        }
    }

    fn spawn_listener(self: &Arc<Self>, mac: MacAddress, mut notifications: BoxStream<'static, Bytes>) {
        let shared: Weak<Self> = Arc::downgrade(self);
        let listener_mac = mac.clone();
        let task = tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.on_data3(&listener_mac, data).await;
            }
            tracing::trace!("notifications from {} ended", listener_mac);
        });
        if let Some(previous) = lock(&self.listeners).insert(mac, task) {
            previous.abort();
        }
    }

    async fn on_data3(&self, mac: &MacAddress, data: Bytes) {
        match classify_data3(data) {
            Data3Notification::ButtonAction(button) => {
                {
                    let mut registry = self.registry.write().await;
                    let Ok(session) = registry.session_mut(mac) else {
                        return;
                    };
                    session.live_state.button = button;
                }
                self.dispatcher.dispatch(Event::ButtonChanged {
                    mac: mac.clone(),
                    button,
                });
            }
            Data3Notification::UnknownAction(code) => {
                tracing::trace!("{} sent unknown button action {:#04x}", mac, code);
            }
            Data3Notification::Response(data) => {
                if !self.complete(mac, RequestKind::Query, Ok(data)).await {
                    tracing::trace!("unsolicited response from {}", mac);
                }
            }
        }
    }

    async fn disconnect(&self, mac: &MacAddress) -> Result<()> {
        let (peripheral, event) = {
            let mut registry = self.registry.write().await;
            let session = registry.session_mut(mac)?;
            match session.connection_state {
                state if state.is_transitioning() => return Err(Error::UnknownDeviceState),
                ConnectionState::Disconnected => return Ok(()),
                _ => {}
            }
            let event = session.set_connection_state(ConnectionState::Disconnecting);
            (session.peripheral.clone(), event)
        };
        self.dispatcher.dispatch_all(event);

        let timeout = self.config.command_timeout;
        let result = match tokio::time::timeout(timeout, self.transport.disconnect(&peripheral)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(timeout)),
        };
        if let Err(e) = &result {
            tracing::warn!("disconnect from {} failed: {}", mac, e);
        }
        self.finish_disconnect(mac).await;
        result
    }

    async fn finish_disconnect(&self, mac: &MacAddress) {
        if let Some(task) = lock(&self.listeners).remove(mac) {
            task.abort();
        }
        let event = {
            let mut registry = self.registry.write().await;
            let Ok(session) = registry.session_mut(mac) else {
                return;
            };
            session.pending.fail_all(|| Error::NotConnected);
            session.set_connection_state(ConnectionState::Disconnected)
        };
        self.dispatcher.dispatch_all(event);
    }

    /// Sets the buzz state and returns the previous one.
    async fn set_buzz(&self, mac: &MacAddress, buzz: BuzzState) -> Option<BuzzState> {
        let previous = {
            let mut registry = self.registry.write().await;
            let session = registry.session_mut(mac).ok()?;
            std::mem::replace(&mut session.live_state.buzz, buzz)
        };
        if previous != buzz {
            self.dispatcher.dispatch(Event::BuzzChanged {
                mac: mac.clone(),
                buzz,
            });
        }
        Some(previous)
    }
}

/// Manager for a fleet of Pebblebee devices.
///
/// The manager keeps one session per device, keyed by the MAC address decoded
/// from its advertisements. Operations on a disconnected device connect it
/// first; the operation runs once service discovery has completed.
pub struct DeviceManager<T: Transport + ?Sized + 'static> {
    shared: Arc<Shared<T>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: Transport + ?Sized + 'static> DeviceManager<T> {
    /// Creates a manager. Background tasks start with [`start`](Self::start).
    #[must_use]
    pub fn new(transport: Arc<T>, config: ManagerConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_capacity);
        let shared = Arc::new(Shared {
            transport,
            registry: RwLock::new(Registry::new()),
            dispatcher,
            config,
            listeners: Mutex::new(HashMap::new()),
            updates: Arc::new(Mutex::new(HashSet::new())),
        });
        Self {
            shared,
            tasks: Vec::new(),
        }
    }

    /// Starts the transport event loop and the out-of-range sweep.
    ///
    /// Calling this on a running manager does nothing.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        let events = self.shared.transport.events();
        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(shared.run_events(events)));

        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                shared.sweep().await;
            }
        }));
        tracing::debug!("device manager started");
    }

    /// Stops the background tasks and notification listeners.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for (_, task) in lock(&self.shared.listeners).drain() {
            task.abort();
        }
    }

    /// Returns the manager configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        self.shared.dispatcher.subscribe(filter)
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Feeds an advertisement directly, bypassing the transport event stream.
    pub async fn handle_advertisement(&self, advertisement: &Advertisement) {
        self.shared.observe(advertisement).await;
    }

    /// Runs one out-of-range sweep now.
    pub async fn sweep(&self) {
        self.shared.sweep().await;
    }

    /// Sets the caller's current location, used to suppress out-of-range
    /// alerts for devices left nearby.
    pub async fn set_caller_location(&self, location: Option<Location>) {
        self.shared
            .registry
            .write()
            .await
            .set_caller_location(location);
    }

    /// Returns snapshots of every known device, ordered by MAC address.
    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        self.shared.registry.read().await.snapshots()
    }

    /// Returns a snapshot of one device.
    pub async fn device(&self, mac: &MacAddress) -> Option<DeviceSnapshot> {
        self.shared
            .registry
            .read()
            .await
            .get(mac)
            .map(DeviceSession::snapshot)
    }

    /// Removes a device and drops its connection.
    ///
    /// Returns false if the device was unknown.
    pub async fn forget(&self, mac: &MacAddress) -> bool {
        if let Some(task) = lock(&self.shared.listeners).remove(mac) {
            task.abort();
        }
        let Some(session) = self.shared.registry.write().await.forget(mac) else {
            return false;
        };
        if session.connection_state != ConnectionState::Disconnected {
            let disconnect = self.shared.transport.disconnect(&session.peripheral);
            if let Ok(Err(e)) =
                tokio::time::timeout(self.shared.config.command_timeout, disconnect).await
            {
                tracing::warn!("disconnect of forgotten {} failed: {}", mac, e);
            }
        }
        true
    }

    /// Connects a device and discovers its characteristics.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the central may not be used.
    /// - [`Error::UnknownDevice`] if the device was never seen.
    /// - [`Error::Busy`] if a connect is already in progress.
    /// - [`Error::ConnectionFailed`] or [`Error::Timeout`] if the transport
    ///   could not connect.
    pub async fn connect(&self, mac: &MacAddress) -> Result<()> {
        self.shared.connect(mac).await
    }

    /// Disconnects a device. Pending requests fail with
    /// [`Error::NotConnected`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDeviceState`] while a connect or disconnect is
    /// in progress.
    pub async fn disconnect(&self, mac: &MacAddress) -> Result<()> {
        self.shared.disconnect(mac).await
    }

    /// Sends a command, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if the model lacks the command and
    /// [`Error::Busy`] if the same command is already in flight.
    pub async fn send_command(&self, mac: &MacAddress, command: DeviceCommand) -> Result<()> {
        let (model, hint) = self.shared.command_target(mac).await?;
        check_capability(model, command.kind())?;
        let writes = command.encode(model, hint)?;
        self.shared
            .request(
                mac,
                RequestKind::Command(command.kind()),
                DeferredOp::Write(writes),
                self.shared.config.command_timeout,
            )
            .await
            .map(drop)
    }

    async fn send_buzz(
        &self,
        mac: &MacAddress,
        command: DeviceCommand,
        attempting: BuzzState,
    ) -> Result<()> {
        let model = self.shared.model_of(mac).await?;
        check_capability(model, command.kind())?;

        let previous = self.shared.set_buzz(mac, attempting).await;
        let result = self.send_command(mac, command).await;
        if let (Err(_), Some(previous)) = (&result, previous) {
            self.shared.set_buzz(mac, previous).await;
        }
        result
    }

    /// Makes the device buzz.
    ///
    /// The buzz state is [`BuzzState::AttemptingBuzz`] until the device's
    /// advertisements report it, and reverts if the command fails.
    pub async fn buzz(&self, mac: &MacAddress) -> Result<()> {
        self.send_buzz(mac, DeviceCommand::Buzz, BuzzState::AttemptingBuzz)
            .await
    }

    /// Stops a running buzz.
    pub async fn stop_buzz(&self, mac: &MacAddress) -> Result<()> {
        self.send_buzz(mac, DeviceCommand::StopBuzz, BuzzState::AttemptingStop)
            .await
    }

    /// Reboots the device.
    pub async fn reboot(&self, mac: &MacAddress) -> Result<()> {
        self.send_command(mac, DeviceCommand::Reboot).await
    }

    /// Sets the buzzer volume.
    pub async fn set_volume(&self, mac: &MacAddress, volume: Volume) -> Result<()> {
        self.send_command(mac, DeviceCommand::SetVolume(volume))
            .await
    }

    /// Sets the tracking mode of a Found.
    pub async fn set_tracking_mode(&self, mac: &MacAddress, mode: TrackingMode) -> Result<()> {
        self.send_command(mac, DeviceCommand::SetTrackingMode(mode))
            .await
    }

    /// Enables or disables debug mode on a Found.
    pub async fn set_debug_mode(&self, mac: &MacAddress, enabled: bool) -> Result<()> {
        self.send_command(mac, DeviceCommand::SetDebugMode(enabled))
            .await
    }

    /// Sends a cellular query and waits for the answering notification.
    ///
    /// Queries share one characteristic, so only one query per device can be
    /// in flight. The wait is bounded by the configured request timeout; a
    /// timed-out query frees the slot for a retry.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsupported`] if the model has no modem.
    /// - [`Error::Busy`] if another query is in flight.
    /// - [`Error::Timeout`] if no answer arrived.
    /// - [`Error::ReadFailed`] if the answer does not decode.
    pub async fn query(&self, mac: &MacAddress, query: CellularQuery) -> Result<QueryResponse> {
        let model = self.shared.model_of(mac).await?;
        if !model.capabilities().can_query_cellular {
            return Err(Error::Unsupported {
                model,
                operation: query.name(),
            });
        }
        let data = self
            .shared
            .request(
                mac,
                RequestKind::Query,
                DeferredOp::Write(vec![query.encode()]),
                self.shared.config.request_timeout,
            )
            .await?;
        parse_query_response(query, &data)
    }

    /// Queries the modem IMEI.
    pub async fn imei(&self, mac: &MacAddress) -> Result<String> {
        match self.query(mac, CellularQuery::Imei).await? {
            QueryResponse::Imei(imei) => Ok(imei),
            _ => Err(unexpected_response(CellularQuery::Imei)),
        }
    }

    /// Queries the SIM ICCID.
    pub async fn iccid(&self, mac: &MacAddress) -> Result<String> {
        match self.query(mac, CellularQuery::Iccid).await? {
            QueryResponse::Iccid(iccid) => Ok(iccid),
            _ => Err(unexpected_response(CellularQuery::Iccid)),
        }
    }

    /// Queries the current tracking mode.
    pub async fn tracking_mode(&self, mac: &MacAddress) -> Result<TrackingMode> {
        match self.query(mac, CellularQuery::TrackingMode).await? {
            QueryResponse::TrackingMode(mode) => Ok(mode),
            _ => Err(unexpected_response(CellularQuery::TrackingMode)),
        }
    }

    /// Queries the LTE link status.
    pub async fn lte_status(&self, mac: &MacAddress) -> Result<LteStatus> {
        match self.query(mac, CellularQuery::LteStatus).await? {
            QueryResponse::LteStatus(status) => Ok(status),
            _ => Err(unexpected_response(CellularQuery::LteStatus)),
        }
    }

    /// Queries the charger status.
    pub async fn charging_status(&self, mac: &MacAddress) -> Result<ChargingStatus> {
        match self.query(mac, CellularQuery::ChargingStatus).await? {
            QueryResponse::ChargingStatus(status) => Ok(status),
            _ => Err(unexpected_response(CellularQuery::ChargingStatus)),
        }
    }

    async fn read(&self, mac: &MacAddress, kind: ReadKind, operation: &'static str) -> Result<Bytes> {
        let model = self.shared.model_of(mac).await?;
        if !model.is_found() {
            return Err(Error::Unsupported { model, operation });
        }
        self.shared
            .request(
                mac,
                RequestKind::Read(kind),
                DeferredOp::Read(kind.characteristic()),
                self.shared.config.command_timeout,
            )
            .await
    }

    /// Reads the battery level of a Found and records it in the live state.
    pub async fn battery_level(&self, mac: &MacAddress) -> Result<f64> {
        let data = self.read(mac, ReadKind::Battery, "battery read").await?;
        let percent = parse_battery_level(&data)?.clamp(0.0, 100.0);

        let changed = {
            let mut registry = self.shared.registry.write().await;
            registry
                .session_mut(mac)
                .is_ok_and(|s| s.apply_battery(percent, self.shared.config.battery_change_threshold))
        };
        if changed {
            self.shared.dispatcher.dispatch(Event::BatteryChanged {
                mac: mac.clone(),
                percent,
            });
        }
        Ok(percent)
    }

    /// Reads the software revision of a Found.
    pub async fn software_revision(&self, mac: &MacAddress) -> Result<String> {
        let data = self
            .read(mac, ReadKind::SoftwareRevision, "software revision read")
            .await?;
        parse_revision(&data)
    }

    /// Reads the hardware revision of a Found.
    pub async fn hardware_revision(&self, mac: &MacAddress) -> Result<HardwareRevision> {
        let data = self
            .read(mac, ReadKind::HardwareRevision, "hardware revision read")
            .await?;
        let revision = parse_revision(&data)?;
        let verified = is_verified_hardware_revision(&revision);
        Ok(HardwareRevision { revision, verified })
    }

    /// Reads whether debug mode is enabled on a Found.
    pub async fn debug_mode(&self, mac: &MacAddress) -> Result<bool> {
        let data = self.read(mac, ReadKind::DebugMode, "debug mode read").await?;
        Ok(parse_debug_mode(&data))
    }

    /// Starts a firmware update on a connected device.
    ///
    /// Progress is published as [`Event::FirmwareProgress`] and through the
    /// returned handle. Updates on different devices run in parallel.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsupported`] if the model has no dual-bank bootloader.
    /// - [`Error::NotConnected`] if discovery has not completed.
    /// - [`Error::FeatureNotAvailable`] if the storage service is incomplete.
    /// - [`Error::Busy`] if an update is already running on the device.
    /// - [`Error::Firmware`] if the image does not decode.
    pub async fn update_firmware(
        &self,
        mac: &MacAddress,
        image: &[u8],
        options: FirmwareUpdateOptions,
    ) -> Result<FirmwareUpdateHandle> {
        let peripheral = {
            let registry = self.shared.registry.read().await;
            let session = registry
                .get(mac)
                .ok_or_else(|| Error::UnknownDevice { mac: mac.clone() })?;
            let model = session.model();
            if !model.capabilities().can_update_firmware {
                return Err(Error::Unsupported {
                    model,
                    operation: "firmware update",
                });
            }
            let Some(characteristics) = session.characteristics.as_ref().filter(|_| session.is_ready())
            else {
                return Err(Error::NotConnected);
            };
            if !REQUIRED_CHARACTERISTICS
                .iter()
                .all(|c| characteristics.contains(c))
            {
                return Err(Error::FeatureNotAvailable);
            }
            session.peripheral.clone()
        };

        if !lock(&self.shared.updates).insert(mac.clone()) {
            return Err(Error::Busy {
                kind: RequestKind::FirmwareUpdate,
            });
        }

        let dispatcher = self.shared.dispatcher.clone();
        let progress_mac = mac.clone();
        let updates = Arc::clone(&self.shared.updates);
        let finished_mac = mac.clone();

        let handle = FirmwareUpdateHandle::spawn(
            Arc::clone(&self.shared.transport),
            peripheral,
            image,
            options,
            self.shared.config.command_timeout,
            move |percent| {
                dispatcher.dispatch(Event::FirmwareProgress {
                    mac: progress_mac.clone(),
                    percent,
                });
            },
            move |result| {
                lock(&updates).remove(&finished_mac);
                match result {
                    Ok(()) => tracing::debug!("firmware update of {} finished", finished_mac),
                    Err(e) => tracing::warn!("firmware update of {} failed: {}", finished_mac, e),
                }
            },
        );

        match handle {
            Ok(handle) => Ok(handle),
            Err(e) => {
                lock(&self.shared.updates).remove(mac);
                Err(e.into())
            }
        }
    }
}

impl<T: Transport + ?Sized + 'static> Drop for DeviceManager<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FirmwareError;
    use crate::event::EventKind;
    use crate::ota::machine::tests::app0_image;
    use crate::protocol::uuids::{
        ALERT_LEVEL, BATTERY_LEVEL, DATA1, DEBUG_MODE, FINDER_SERVICE, HARDWARE_REVISION,
    };
    use crate::transport::{MockTransport, WriteMode};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn found_ad() -> Advertisement {
        let mut data = vec![0x0E, 0x07, 0x00, 0x10, 0x00, 0x20];
        data.extend_from_slice(&[0; 9]);
        data.push(0x11);
        Advertisement {
            peripheral: PeripheralId::from("found"),
            manufacturer_data: Bytes::from(data),
            ..Advertisement::default()
        }
    }

    fn finder_ad() -> Advertisement {
        let mut data = vec![0x0E, 0x0E, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0, 0, 0, 0];
        data.extend_from_slice(&2600u16.to_le_bytes());
        data.push(0);
        Advertisement {
            peripheral: PeripheralId::from("finder"),
            service_uuids: vec![FINDER_SERVICE],
            manufacturer_data: Bytes::from(data),
            local_name: None,
        }
    }

    /// A Honey advertising firmware generation `hint`.
    fn honey_ad(hint: u8) -> Advertisement {
        Advertisement {
            peripheral: PeripheralId::from("honey"),
            manufacturer_data: Bytes::from(vec![0x0E, 0x0A, 0x00, 0x01, 0x00, 0x03, 0x00, hint]),
            ..Advertisement::default()
        }
    }

    async fn honey_manager(
        hint: u8,
    ) -> (DeviceManager<MockTransport>, MockTransport, MacAddress) {
        let (manager, mock) = manager_with(&[ALERT_LEVEL], ManagerConfig::default()).await;
        manager.handle_advertisement(&honey_ad(hint)).await;
        (manager, mock, MacAddress::new("0e0a00010003"))
    }

    fn found() -> MacAddress {
        MacAddress::new("0e0700100020")
    }

    fn peripheral() -> PeripheralId {
        PeripheralId::from("found")
    }

    async fn manager_with(
        characteristics: &[Uuid],
        config: ManagerConfig,
    ) -> (DeviceManager<MockTransport>, MockTransport) {
        init_tracing();
        let mock = MockTransport::new();
        mock.set_characteristics(characteristics);
        let manager = DeviceManager::new(Arc::new(mock.clone()), config);
        manager.handle_advertisement(&found_ad()).await;
        (manager, mock)
    }

    async fn found_manager() -> (DeviceManager<MockTransport>, MockTransport) {
        manager_with(&[DATA1, DATA3], ManagerConfig::default()).await
    }

    async fn next_kinds(subscription: &mut Subscription, count: usize) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        for _ in 0..count {
            let event = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
                .await
                .unwrap()
                .unwrap();
            kinds.push(event.kind());
        }
        kinds
    }

    fn imei_reply() -> Vec<u8> {
        let mut reply = vec![0x04, 0x01, 0x00];
        reply.extend_from_slice(b"356938035643809");
        reply
    }

    #[tokio::test]
    async fn test_command_on_disconnected_device_connects_first() {
        let (manager, mock) = found_manager().await;
        let mut events = manager.subscribe(Some(EventFilter::kinds(vec![
            EventKind::ConnectionStateChanged,
            EventKind::CharacteristicsReady,
            EventKind::BuzzChanged,
        ])));

        manager.buzz(&found()).await.unwrap();

        assert_eq!(
            next_kinds(&mut events, 4).await,
            vec![
                EventKind::BuzzChanged,
                EventKind::ConnectionStateChanged,
                EventKind::ConnectionStateChanged,
                EventKind::CharacteristicsReady,
            ]
        );
        let writes = mock.writes_to(DATA1);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload.as_ref(), &[0x01]);

        let snapshot = manager.device(&found()).await.unwrap();
        assert_eq!(snapshot.connection_state, ConnectionState::Connected);
        assert_eq!(snapshot.live_state.buzz, BuzzState::AttemptingBuzz);
    }

    #[tokio::test]
    async fn test_failed_buzz_reverts_state() {
        let (manager, mock) = found_manager().await;
        mock.fail_writes_to(DATA1);

        let error = manager.buzz(&found()).await.unwrap_err();

        assert!(matches!(error, Error::WriteFailed { .. }));
        let snapshot = manager.device(&found()).await.unwrap();
        assert_eq!(snapshot.live_state.buzz, BuzzState::Idle);
    }

    #[tokio::test]
    async fn test_honey_buzz_resets_old_firmware_first() {
        let (manager, mock, honey) = honey_manager(1).await;

        manager.buzz(&honey).await.unwrap();

        let sent: Vec<(Vec<u8>, WriteMode)> = mock
            .writes_to(ALERT_LEVEL)
            .into_iter()
            .map(|w| (w.payload.to_vec(), w.mode))
            .collect();
        assert_eq!(
            sent,
            vec![
                (vec![0x00], WriteMode::WithoutResponse),
                (vec![0x02], WriteMode::WithoutResponse),
            ]
        );
        assert!(matches!(
            manager.stop_buzz(&honey).await,
            Err(Error::Unsupported {
                model: DeviceModel::Honey,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_honey_buzz_on_robert_firmware_is_acknowledged() {
        let (manager, mock, honey) = honey_manager(5).await;

        manager.buzz(&honey).await.unwrap();

        let writes = mock.writes_to(ALERT_LEVEL);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload.as_ref(), &[0x02]);
        assert_eq!(writes[0].mode, WriteMode::WithResponse);
        let snapshot = manager.device(&honey).await.unwrap();
        assert_eq!(snapshot.live_state.buzz, BuzzState::AttemptingBuzz);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_is_busy() {
        let (manager, mock) = found_manager().await;
        mock.set_connect_delay(Duration::from_secs(1));
        let manager = Arc::new(manager);

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(&found()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let error = manager.connect(&found()).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Busy {
                kind: RequestKind::Connect
            }
        ));

        first.await.unwrap().unwrap();
        assert!(mock.is_connected(&peripheral()));
        // Connecting a ready device is a no-op.
        manager.connect(&found()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_central() {
        let (manager, mock) = found_manager().await;
        mock.set_central_state(CentralState::Unauthorized);

        assert!(matches!(
            manager.connect(&found()).await,
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            manager.reboot(&found()).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (manager, _mock) = found_manager().await;
        let stranger = MacAddress::new("aabbccddeeff");
        assert!(matches!(
            manager.connect(&stranger).await,
            Err(Error::UnknownDevice { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_sets_disconnected() {
        let (manager, mock) = found_manager().await;
        mock.fail_connect(true);

        assert!(matches!(
            manager.connect(&found()).await,
            Err(Error::ConnectionFailed)
        ));
        assert!(matches!(
            manager.buzz(&found()).await,
            Err(Error::ConnectionFailed)
        ));
        let snapshot = manager.device(&found()).await.unwrap();
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_query_answered_by_notification() {
        let (manager, mock) = found_manager().await;
        mock.reply_on_write(DATA3, vec![0x04, 0x01, 0x00], DATA3, imei_reply());

        let imei = manager.imei(&found()).await.unwrap();

        assert_eq!(imei, "356938035643809");
        assert_eq!(mock.writes_to(DATA3)[0].payload.as_ref(), &[0x04, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_button_action_does_not_answer_query() {
        let (manager, mock) = found_manager().await;
        manager.connect(&found()).await.unwrap();
        mock.reply_on_write(DATA3, vec![0x08, 0x03, 0x00], DATA3, vec![0x08, 0x09, 0x00, 0x01]);
        mock.reply_on_write(DATA3, vec![0x08, 0x03, 0x00], DATA3, vec![0x08, 0x03, 0x00, 0x01]);
        let mut buttons = manager.subscribe(Some(EventFilter::kinds(vec![EventKind::ButtonChanged])));

        let status = manager.charging_status(&found()).await.unwrap();

        assert_eq!(status, ChargingStatus::Charging);
        let event = tokio::time::timeout(Duration::from_secs(1), buttons.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(Event::ButtonChanged {
                mac: found(),
                button: crate::types::ButtonState::Double,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_frees_slot() {
        let (manager, mock) = found_manager().await;
        manager.connect(&found()).await.unwrap();

        let error = manager.imei(&found()).await.unwrap_err();
        assert!(matches!(error, Error::Timeout { timeout_ms: 2000 }));

        mock.reply_on_write(DATA3, vec![0x04, 0x01, 0x00], DATA3, imei_reply());
        assert_eq!(manager.imei(&found()).await.unwrap(), "356938035643809");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_queries_are_busy() {
        let (manager, _mock) = found_manager().await;
        manager.connect(&found()).await.unwrap();
        let manager = Arc::new(manager);

        let pending = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.imei(&found()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            manager.lte_status(&found()).await,
            Err(Error::Busy {
                kind: RequestKind::Query
            })
        ));
        assert!(matches!(
            pending.await.unwrap(),
            Err(Error::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_pending_requests() {
        let (manager, mock) = found_manager().await;
        manager.connect(&found()).await.unwrap();
        let manager = Arc::new(manager);

        let pending = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.imei(&found()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        manager.disconnect(&found()).await.unwrap();

        assert!(matches!(pending.await.unwrap(), Err(Error::NotConnected)));
        assert!(!mock.is_connected(&peripheral()));
        // Disconnecting again is a no-op.
        manager.disconnect(&found()).await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_events_drive_registry() {
        let (mut manager, mock) = found_manager().await;
        manager.start();
        manager.connect(&found()).await.unwrap();
        let mut events = manager.subscribe(Some(EventFilter::kinds(vec![
            EventKind::ConnectionStateChanged,
            EventKind::DeviceDiscovered,
        ])));

        mock.drop_connection(&peripheral());
        mock.advertise(finder_ad());

        assert_eq!(
            events.recv().await,
            Some(Event::ConnectionStateChanged {
                mac: found(),
                state: ConnectionState::Disconnected,
            })
        );
        assert_eq!(
            events.recv().await.map(|e| e.kind()),
            Some(EventKind::DeviceDiscovered)
        );
        assert_eq!(manager.devices().await.len(), 2);
        manager.stop();
    }

    #[tokio::test]
    async fn test_capability_checks() {
        let (manager, _mock) = found_manager().await;
        manager.handle_advertisement(&finder_ad()).await;
        let finder = MacAddress::new("0e0e00010002");

        assert!(matches!(
            manager
                .set_tracking_mode(&finder, TrackingMode::Emergency)
                .await,
            Err(Error::Unsupported {
                model: DeviceModel::Finder,
                ..
            })
        ));
        assert!(matches!(
            manager.imei(&finder).await,
            Err(Error::Unsupported { .. })
        ));
        assert!(matches!(
            manager.battery_level(&finder).await,
            Err(Error::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_reads() {
        let (manager, mock) = manager_with(
            &[DATA1, DATA3, BATTERY_LEVEL, HARDWARE_REVISION],
            ManagerConfig::default(),
        )
        .await;
        mock.push_read(BATTERY_LEVEL, vec![87]);
        mock.push_read(HARDWARE_REVISION, &b"BL.1.2"[..]);

        assert_eq!(manager.battery_level(&found()).await.unwrap(), 87.0);
        let snapshot = manager.device(&found()).await.unwrap();
        assert_eq!(snapshot.live_state.battery_percent, Some(87.0));

        let revision = manager.hardware_revision(&found()).await.unwrap();
        assert_eq!(revision.revision, "BL.1.2");
        assert!(!revision.verified);

        // The firmware lacks the debug characteristic.
        assert!(matches!(
            manager.debug_mode(&found()).await,
            Err(Error::FeatureNotAvailable)
        ));
        assert!(mock.writes_to(DEBUG_MODE).is_empty());
    }

    #[tokio::test]
    async fn test_firmware_update_through_manager() {
        let mut characteristics = vec![DATA1, DATA3];
        characteristics.extend_from_slice(&REQUIRED_CHARACTERISTICS);
        let (manager, mock) = manager_with(&characteristics, ManagerConfig::default()).await;
        mock.emulate_flash();
        let image = app0_image(20);

        assert!(matches!(
            manager
                .update_firmware(&found(), &image, FirmwareUpdateOptions::default())
                .await,
            Err(Error::NotConnected)
        ));

        manager.connect(&found()).await.unwrap();
        let mut progress = manager.subscribe(Some(
            EventFilter::kinds(vec![EventKind::FirmwareProgress]).for_device(found()),
        ));

        let handle = manager
            .update_firmware(&found(), &image, FirmwareUpdateOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            manager
                .update_firmware(&found(), &image, FirmwareUpdateOptions::default())
                .await,
            Err(Error::Busy {
                kind: RequestKind::FirmwareUpdate
            })
        ));

        assert_eq!(handle.wait().await, Ok(()));
        assert!(lock(&manager.shared.updates).is_empty());
        assert_eq!(mock.flash_byte(0x6000 + 3), Some(3));

        let mut last = 0;
        while let Ok(Some(Event::FirmwareProgress { percent, .. })) =
            tokio::time::timeout(Duration::from_millis(100), progress.recv()).await
        {
            last = percent;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn test_firmware_update_requires_storage_service() {
        let (manager, _mock) = found_manager().await;
        manager.connect(&found()).await.unwrap();

        assert!(matches!(
            manager
                .update_firmware(&found(), &app0_image(1), FirmwareUpdateOptions::default())
                .await,
            Err(Error::FeatureNotAvailable)
        ));
    }

    #[tokio::test]
    async fn test_invalid_image_releases_update_slot() {
        let mut characteristics = vec![DATA1, DATA3];
        characteristics.extend_from_slice(&REQUIRED_CHARACTERISTICS);
        let (manager, _mock) = manager_with(&characteristics, ManagerConfig::default()).await;
        manager.connect(&found()).await.unwrap();

        let error = manager
            .update_firmware(&found(), &[0xC3, 0x28], FirmwareUpdateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Firmware(FirmwareError::CorruptedImage { .. })
        ));
        assert!(lock(&manager.shared.updates).is_empty());
    }

    #[tokio::test]
    async fn test_central_power_off_disconnects_sessions() {
        let (mut manager, mock) = found_manager().await;
        manager.start();
        manager.connect(&found()).await.unwrap();
        let mut events = manager.subscribe(Some(EventFilter::kinds(vec![
            EventKind::CentralStateChanged,
            EventKind::ConnectionStateChanged,
        ])));

        mock.set_central_state(CentralState::PoweredOff);

        assert_eq!(
            events.recv().await,
            Some(Event::CentralStateChanged(CentralState::PoweredOff))
        );
        assert_eq!(
            events.recv().await,
            Some(Event::ConnectionStateChanged {
                mac: found(),
                state: ConnectionState::Disconnected,
            })
        );
    }

    #[tokio::test]
    async fn test_forget_drops_connection() {
        let (manager, mock) = found_manager().await;
        manager.connect(&found()).await.unwrap();

        assert!(manager.forget(&found()).await);
        assert!(!manager.forget(&found()).await);
        assert!(!mock.is_connected(&peripheral()));
        assert!(manager.devices().await.is_empty());
    }
}
