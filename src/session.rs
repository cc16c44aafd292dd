//! Per-device session state and pending request bookkeeping.
//!
//! Each device has at most one outstanding request of every [`RequestKind`].
//! A request holds the `oneshot` sender its caller is waiting on and, until
//! the device's characteristics are known, the operation to run once they
//! are.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::command::{CommandKind, EncodedWrite};
use crate::protocol::uuids::{
    BATTERY_LEVEL, DEBUG_MODE, FINDER_DISCOVERY, FOUND_DISCOVERY, HARDWARE_REVISION,
    HONEY_DISCOVERY, SOFTWARE_REVISION,
};
use crate::types::{
    ConnectionState, DeviceIdentity, DeviceModel, LiveState, Location, MacAddress, ModelFamily,
    PeripheralId,
};

/// Characteristic reads the manager performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadKind {
    /// Battery level.
    Battery,
    /// Software revision string.
    SoftwareRevision,
    /// Hardware revision string.
    HardwareRevision,
    /// Debug mode flag.
    DebugMode,
}

impl ReadKind {
    /// Characteristic read for this kind.
    #[must_use]
    pub const fn characteristic(self) -> Uuid {
        match self {
            Self::Battery => BATTERY_LEVEL,
            Self::SoftwareRevision => SOFTWARE_REVISION,
            Self::HardwareRevision => HARDWARE_REVISION,
            Self::DebugMode => DEBUG_MODE,
        }
    }
}

/// Slot a pending request occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Connect plus service discovery.
    Connect,
    /// An acknowledged command write.
    Command(CommandKind),
    /// A cellular query; all queries share one characteristic.
    Query,
    /// A characteristic read.
    Read(ReadKind),
    /// A firmware update.
    FirmwareUpdate,
}

/// Transport operation deferred until characteristics are ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredOp {
    /// Write characteristics in order.
    Write(Vec<EncodedWrite>),
    /// Read a characteristic.
    Read(Uuid),
}

impl DeferredOp {
    /// Returns true if every characteristic the operation touches is present.
    #[must_use]
    pub fn is_available(&self, characteristics: &BTreeSet<Uuid>) -> bool {
        match self {
            Self::Write(writes) => writes
                .iter()
                .all(|write| characteristics.contains(&write.characteristic)),
            Self::Read(characteristic) => characteristics.contains(characteristic),
        }
    }
}

/// Receiver a caller awaits for a pending request.
pub type ResponseReceiver = oneshot::Receiver<Result<Bytes>>;

#[derive(Debug)]
struct Pending {
    sender: oneshot::Sender<Result<Bytes>>,
    op: Option<DeferredOp>,
}

/// One slot per [`RequestKind`].
#[derive(Debug, Default)]
pub struct PendingRequests {
    slots: HashMap<RequestKind, Pending>,
}

impl PendingRequests {
    /// Claims the slot for `kind`.
    ///
    /// A slot whose caller has gone away is reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if a live request of the same kind exists.
    pub fn register(&mut self, kind: RequestKind, op: Option<DeferredOp>) -> Result<ResponseReceiver> {
        let (sender, receiver) = oneshot::channel();
        match self.slots.entry(kind) {
            Entry::Occupied(mut slot) => {
                if !slot.get().sender.is_closed() {
                    return Err(Error::Busy { kind });
                }
                slot.insert(Pending { sender, op });
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending { sender, op });
            }
        }
        Ok(receiver)
    }

    /// Completes and clears the slot. Returns false if nothing was pending.
    pub fn complete(&mut self, kind: RequestKind, result: Result<Bytes>) -> bool {
        match self.slots.remove(&kind) {
            Some(pending) => {
                // The caller may have timed out.
                let _ = pending.sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Clears the slot without answering it.
    pub fn cancel(&mut self, kind: RequestKind) -> bool {
        self.slots.remove(&kind).is_some()
    }

    /// Returns true if a live request of `kind` exists.
    #[must_use]
    pub fn is_pending(&self, kind: RequestKind) -> bool {
        self.slots
            .get(&kind)
            .is_some_and(|pending| !pending.sender.is_closed())
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Takes every deferred operation whose characteristic is available.
    ///
    /// Requests waiting on a characteristic the firmware lacks fail with
    /// [`Error::FeatureNotAvailable`].
    pub fn take_ready(&mut self, characteristics: &BTreeSet<Uuid>) -> Vec<(RequestKind, DeferredOp)> {
        let mut ready = Vec::new();
        let mut missing = Vec::new();

        for (kind, pending) in &mut self.slots {
            let Some(op) = pending.op.take() else {
                continue;
            };
            if op.is_available(characteristics) {
                ready.push((*kind, op));
            } else {
                missing.push(*kind);
            }
        }

        for kind in missing {
            self.complete(kind, Err(Error::FeatureNotAvailable));
        }
        ready
    }

    /// Fails every pending request.
    pub fn fail_all(&mut self, error: impl Fn() -> Error) {
        for (_, pending) in self.slots.drain() {
            let _ = pending.sender.send(Err(error()));
        }
    }
}

/// Services discovered on connect.
#[must_use]
pub fn discovery_services(model: DeviceModel) -> &'static [Uuid] {
    if model.is_found() {
        &FOUND_DISCOVERY
    } else if model == DeviceModel::Honey {
        &HONEY_DISCOVERY
    } else if model.family() == ModelFamily::Legacy {
        &FINDER_DISCOVERY
    } else {
        &[]
    }
}

/// Everything the manager tracks about one device.
#[derive(Debug)]
pub struct DeviceSession {
    /// Identity decoded from the first advertisement.
    pub identity: DeviceIdentity,
    /// Transport handle of the latest advertisement.
    pub peripheral: PeripheralId,
    /// Connection state.
    pub connection_state: ConnectionState,
    /// Last advertisement or sweep refresh.
    pub last_seen_at: Instant,
    /// Whether the device is considered nearby.
    pub in_range: bool,
    /// Decoded advertisement state.
    pub live_state: LiveState,
    /// Outstanding requests.
    pub pending: PendingRequests,
    /// Characteristics found by discovery, once connected.
    pub characteristics: Option<BTreeSet<Uuid>>,
    /// Caller location when the device was last heard.
    pub last_location: Option<Location>,
}

impl DeviceSession {
    /// Creates a disconnected, in-range session.
    #[must_use]
    pub fn new(identity: DeviceIdentity, peripheral: PeripheralId, now: Instant) -> Self {
        Self {
            identity,
            peripheral,
            connection_state: ConnectionState::Disconnected,
            last_seen_at: now,
            in_range: true,
            live_state: LiveState::default(),
            pending: PendingRequests::default(),
            characteristics: None,
            last_location: None,
        }
    }

    /// Device address.
    #[must_use]
    pub const fn mac(&self) -> &MacAddress {
        &self.identity.mac
    }

    /// Device model.
    #[must_use]
    pub const fn model(&self) -> DeviceModel {
        self.identity.model
    }

    /// Returns true once discovery has completed on a live connection.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.connection_state == ConnectionState::Connected && self.characteristics.is_some()
    }

    /// Updates the range flag; returns an event only when it changed.
    pub fn mark(&mut self, in_range: bool, alert: bool) -> Option<Event> {
        if self.in_range == in_range {
            return None;
        }
        self.in_range = in_range;
        Some(Event::RangeChanged {
            mac: self.mac().clone(),
            in_range,
            alert,
        })
    }

    /// Updates the connection state; returns an event only when it changed.
    pub fn set_connection_state(&mut self, state: ConnectionState) -> Option<Event> {
        if self.connection_state == state {
            return None;
        }
        self.connection_state = state;
        if state != ConnectionState::Connected {
            self.characteristics = None;
        }
        Some(Event::ConnectionStateChanged {
            mac: self.mac().clone(),
            state,
        })
    }

    /// Stores a battery reading. Returns true on the first reading or when it
    /// moved by more than `threshold` points.
    pub fn apply_battery(&mut self, percent: f64, threshold: f64) -> bool {
        let changed = self
            .live_state
            .battery_percent
            .is_none_or(|previous| (percent - previous).abs() > threshold);
        if changed {
            self.live_state.battery_percent = Some(percent);
        }
        changed
    }

    /// Copies the caller-visible state.
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            identity: self.identity.clone(),
            connection_state: self.connection_state,
            in_range: self.in_range,
            live_state: self.live_state.clone(),
            last_location: self.last_location,
            characteristics: self.characteristics.clone(),
        }
    }
}

/// Read-only copy of a [`DeviceSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    /// Device identity.
    pub identity: DeviceIdentity,
    /// Connection state.
    pub connection_state: ConnectionState,
    /// Whether the device is considered nearby.
    pub in_range: bool,
    /// Decoded advertisement state.
    pub live_state: LiveState,
    /// Caller location when the device was last heard.
    pub last_location: Option<Location>,
    /// Characteristics found by discovery.
    pub characteristics: Option<BTreeSet<Uuid>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::DeviceCommand;
    use crate::protocol::uuids::{DATA1, DATA3, IMMEDIATE_ALERT_SERVICE};

    fn session() -> DeviceSession {
        let identity = DeviceIdentity {
            mac: MacAddress::new("0e0e00010002"),
            model: DeviceModel::Found,
            family: ModelFamily::Legacy,
            product_revision: Some(15),
            beacon: None,
        };
        DeviceSession::new(identity, PeripheralId::from("p"), Instant::now())
    }

    fn buzz() -> DeferredOp {
        DeferredOp::Write(DeviceCommand::Buzz.encode(DeviceModel::Found, None).unwrap())
    }

    #[tokio::test]
    async fn test_second_request_of_same_kind_is_busy() {
        let mut pending = PendingRequests::default();
        let kind = RequestKind::Command(CommandKind::Buzz);

        let _rx = pending.register(kind, Some(buzz())).unwrap();
        let err = pending.register(kind, Some(buzz())).unwrap_err();
        assert!(matches!(err, Error::Busy { kind: k } if k == kind));

        // Other kinds are independent.
        assert!(pending.register(RequestKind::Query, None).is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_slot_is_reclaimed() {
        let mut pending = PendingRequests::default();
        drop(pending.register(RequestKind::Query, None).unwrap());

        assert!(!pending.is_pending(RequestKind::Query));
        assert!(pending.register(RequestKind::Query, None).is_ok());
    }

    #[tokio::test]
    async fn test_complete_answers_caller() {
        let mut pending = PendingRequests::default();
        let rx = pending.register(RequestKind::Query, None).unwrap();

        assert!(pending.complete(RequestKind::Query, Ok(Bytes::from_static(&[1]))));
        assert!(!pending.complete(RequestKind::Query, Ok(Bytes::new())));
        assert_eq!(rx.await.unwrap().unwrap().as_ref(), &[1]);
    }

    #[tokio::test]
    async fn test_take_ready_fails_missing_features() {
        let mut pending = PendingRequests::default();
        let buzz_rx = pending
            .register(RequestKind::Command(CommandKind::Buzz), Some(buzz()))
            .unwrap();
        let debug_rx = pending
            .register(
                RequestKind::Read(ReadKind::DebugMode),
                Some(DeferredOp::Read(DEBUG_MODE)),
            )
            .unwrap();

        let characteristics: BTreeSet<Uuid> = [DATA1, DATA3].into_iter().collect();
        let ready = pending.take_ready(&characteristics);

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, RequestKind::Command(CommandKind::Buzz));
        assert!(matches!(
            debug_rx.await.unwrap(),
            Err(Error::FeatureNotAvailable)
        ));

        // The buzz slot stays occupied until its write completes.
        assert!(pending.is_pending(RequestKind::Command(CommandKind::Buzz)));
        assert!(pending.take_ready(&characteristics).is_empty());
        drop(buzz_rx);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let mut pending = PendingRequests::default();
        let a = pending.register(RequestKind::Query, None).unwrap();
        let b = pending.register(RequestKind::Connect, None).unwrap();

        pending.fail_all(|| Error::NotConnected);

        assert!(pending.is_empty());
        assert!(matches!(a.await.unwrap(), Err(Error::NotConnected)));
        assert!(matches!(b.await.unwrap(), Err(Error::NotConnected)));
    }

    #[test]
    fn test_battery_threshold() {
        let mut s = session();
        assert!(s.apply_battery(80.0, 5.0));
        assert!(!s.apply_battery(77.0, 5.0));
        assert_eq!(s.live_state.battery_percent, Some(80.0));
        assert!(s.apply_battery(74.0, 5.0));
        assert_eq!(s.live_state.battery_percent, Some(74.0));
    }

    #[test]
    fn test_range_and_connection_events_only_on_change() {
        let mut s = session();
        assert!(s.mark(true, true).is_none());
        assert_eq!(
            s.mark(false, true),
            Some(Event::RangeChanged {
                mac: MacAddress::new("0e0e00010002"),
                in_range: false,
                alert: true,
            })
        );

        s.characteristics = Some(BTreeSet::new());
        assert!(s.set_connection_state(ConnectionState::Disconnected).is_none());
        assert!(s.set_connection_state(ConnectionState::Connected).is_some());
        s.characteristics = Some(BTreeSet::new());
        assert!(s.is_ready());
        s.set_connection_state(ConnectionState::Disconnecting);
        assert!(s.characteristics.is_none());
    }

    #[test]
    fn test_discovery_services() {
        assert_eq!(discovery_services(DeviceModel::Found).len(), 5);
        assert_eq!(discovery_services(DeviceModel::Finder2), &FINDER_DISCOVERY);
        assert!(discovery_services(DeviceModel::Honey).contains(&IMMEDIATE_ALERT_SERVICE));
        assert!(discovery_services(DeviceModel::MfiTag).is_empty());
    }
}
