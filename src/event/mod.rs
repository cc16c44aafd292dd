//! Event system for async notifications.
//!
//! The event system is how callers observe the device fleet: discoveries,
//! live-state changes, connection changes, characteristic readiness and
//! firmware progress are all dispatched here.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::transport::CentralState;
use crate::types::{
    AdvertisementRate, ButtonState, BuzzState, ConnectionState, DeviceIdentity, MacAddress,
};

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A device was seen for the first time.
    DeviceDiscovered(DeviceIdentity),
    /// A known device advertised again or was refreshed by the sweep.
    DeviceUpdated { mac: MacAddress },
    /// Button state changed.
    ButtonChanged { mac: MacAddress, button: ButtonState },
    /// Buzzer state changed.
    BuzzChanged { mac: MacAddress, buzz: BuzzState },
    /// Advertisement rate changed.
    AdvertisementRateChanged {
        mac: MacAddress,
        rate: AdvertisementRate,
    },
    /// Battery level changed noticeably.
    BatteryChanged { mac: MacAddress, percent: f64 },
    /// Device entered or left range.
    RangeChanged {
        mac: MacAddress,
        in_range: bool,
        /// Whether the change should be surfaced to the user.
        alert: bool,
    },
    /// Connection state changed.
    ConnectionStateChanged {
        mac: MacAddress,
        state: ConnectionState,
    },
    /// Service discovery completed and these characteristics are usable.
    CharacteristicsReady {
        mac: MacAddress,
        characteristics: BTreeSet<Uuid>,
    },
    /// Firmware update progress (0-100).
    FirmwareProgress { mac: MacAddress, percent: u8 },
    /// The Bluetooth central changed state.
    CentralStateChanged(CentralState),
}

/// Discriminant of an [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::DeviceDiscovered`]
    DeviceDiscovered,
    /// [`Event::DeviceUpdated`]
    DeviceUpdated,
    /// [`Event::ButtonChanged`]
    ButtonChanged,
    /// [`Event::BuzzChanged`]
    BuzzChanged,
    /// [`Event::AdvertisementRateChanged`]
    AdvertisementRateChanged,
    /// [`Event::BatteryChanged`]
    BatteryChanged,
    /// [`Event::RangeChanged`]
    RangeChanged,
    /// [`Event::ConnectionStateChanged`]
    ConnectionStateChanged,
    /// [`Event::CharacteristicsReady`]
    CharacteristicsReady,
    /// [`Event::FirmwareProgress`]
    FirmwareProgress,
    /// [`Event::CentralStateChanged`]
    CentralStateChanged,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::DeviceDiscovered(_) => EventKind::DeviceDiscovered,
            Self::DeviceUpdated { .. } => EventKind::DeviceUpdated,
            Self::ButtonChanged { .. } => EventKind::ButtonChanged,
            Self::BuzzChanged { .. } => EventKind::BuzzChanged,
            Self::AdvertisementRateChanged { .. } => EventKind::AdvertisementRateChanged,
            Self::BatteryChanged { .. } => EventKind::BatteryChanged,
            Self::RangeChanged { .. } => EventKind::RangeChanged,
            Self::ConnectionStateChanged { .. } => EventKind::ConnectionStateChanged,
            Self::CharacteristicsReady { .. } => EventKind::CharacteristicsReady,
            Self::FirmwareProgress { .. } => EventKind::FirmwareProgress,
            Self::CentralStateChanged(_) => EventKind::CentralStateChanged,
        }
    }

    /// Returns the device this event concerns, if any.
    #[must_use]
    pub fn mac(&self) -> Option<&MacAddress> {
        match self {
            Self::DeviceDiscovered(identity) => Some(&identity.mac),
            Self::DeviceUpdated { mac }
            | Self::ButtonChanged { mac, .. }
            | Self::BuzzChanged { mac, .. }
            | Self::AdvertisementRateChanged { mac, .. }
            | Self::BatteryChanged { mac, .. }
            | Self::RangeChanged { mac, .. }
            | Self::ConnectionStateChanged { mac, .. }
            | Self::CharacteristicsReady { mac, .. }
            | Self::FirmwareProgress { mac, .. } => Some(mac),
            Self::CentralStateChanged(_) => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next event that passes the subscription's filter.
    ///
    /// Returns `None` once the dispatcher is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("subscription lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by device.
    pub mac: Option<MacAddress>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            mac: None,
        }
    }

    /// Creates a filter for every event about one device.
    #[must_use]
    pub const fn device(mac: MacAddress) -> Self {
        Self {
            kinds: None,
            mac: Some(mac),
        }
    }

    /// Narrows the filter to one device.
    #[must_use]
    pub fn for_device(mut self, mac: MacAddress) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(ref expected) = self.mac {
            if event.mac() != Some(expected) {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        let inner = Arc::new(EventDispatcherInner { sender });

        Self { inner }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        tracing::trace!("dispatch {:?}", event.kind());
        // No receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    /// Dispatches a batch of events in order.
    pub fn dispatch_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.dispatch(event);
        }
    }

    /// Subscribes to events with an optional filter.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        let receiver = self.inner.sender.subscribe();
        Subscription { receiver, filter }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe(Some(filter));

        tokio::select! {
            biased;
            result = subscription.recv() => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        MacAddress::new("0e0e00010002")
    }

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe(None);

        dispatcher.dispatch(Event::DeviceUpdated { mac: mac() });

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert_eq!(event, Some(Event::DeviceUpdated { mac: mac() }));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::kinds(vec![EventKind::ButtonChanged, EventKind::BuzzChanged]);

        assert!(filter.matches(&Event::ButtonChanged {
            mac: mac(),
            button: ButtonState::Single,
        }));
        assert!(filter.matches(&Event::BuzzChanged {
            mac: mac(),
            buzz: BuzzState::Buzzing,
        }));
        assert!(!filter.matches(&Event::DeviceUpdated { mac: mac() }));
    }

    #[test]
    fn test_device_filter() {
        let filter = EventFilter::kinds(vec![EventKind::FirmwareProgress]).for_device(mac());

        assert!(filter.matches(&Event::FirmwareProgress {
            mac: mac(),
            percent: 10
        }));
        assert!(!filter.matches(&Event::FirmwareProgress {
            mac: MacAddress::new("ffeeddccbbaa"),
            percent: 10
        }));
        assert!(!EventFilter::device(mac())
            .matches(&Event::CentralStateChanged(CentralState::PoweredOn)));
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips_other_devices() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe(Some(EventFilter::device(mac())));

        dispatcher.dispatch(Event::DeviceUpdated {
            mac: MacAddress::new("ffeeddccbbaa"),
        });
        dispatcher.dispatch(Event::DeviceUpdated { mac: mac() });

        assert_eq!(sub.recv().await, Some(Event::DeviceUpdated { mac: mac() }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let dispatcher = EventDispatcher::new(16);
        let result = dispatcher
            .wait_for(
                EventFilter::kinds(vec![EventKind::CharacteristicsReady]),
                std::time::Duration::from_secs(2),
            )
            .await;
        assert!(result.is_none());
    }
}
