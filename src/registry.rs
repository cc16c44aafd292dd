//! Device registry: advertisement ingestion and the out-of-range sweep.
//!
//! The registry is synchronous and owns every [`DeviceSession`]. Each
//! mutation returns the events it produced so the caller can dispatch them
//! after releasing its lock.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tokio::time::Instant;

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::advertisement::{decode_battery, decode_identity, decode_state};
use crate::protocol::Advertisement;
use crate::session::{DeviceSession, DeviceSnapshot};
use crate::types::{ConnectionState, Location, MacAddress, PeripheralId};

/// All known devices, keyed by MAC address.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<MacAddress, DeviceSession>,
    by_peripheral: HashMap<PeripheralId, MacAddress>,
    last_sweep: Option<Instant>,
    caller_location: Option<Location>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no device is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns a session.
    #[must_use]
    pub fn get(&self, mac: &MacAddress) -> Option<&DeviceSession> {
        self.sessions.get(mac)
    }

    /// Returns a session for mutation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] if no session exists.
    pub fn session_mut(&mut self, mac: &MacAddress) -> Result<&mut DeviceSession> {
        self.sessions
            .get_mut(mac)
            .ok_or_else(|| Error::UnknownDevice { mac: mac.clone() })
    }

    /// Looks up the device behind a transport handle.
    #[must_use]
    pub fn mac_for(&self, peripheral: &PeripheralId) -> Option<&MacAddress> {
        self.by_peripheral.get(peripheral)
    }

    /// Snapshots of every device, ordered by MAC address.
    #[must_use]
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots: Vec<_> = self.sessions.values().map(DeviceSession::snapshot).collect();
        snapshots.sort_by(|a, b| a.identity.mac.cmp(&b.identity.mac));
        snapshots
    }

    /// Sets the caller's last known location.
    pub fn set_caller_location(&mut self, location: Option<Location>) {
        self.caller_location = location;
    }

    /// The caller's last known location.
    #[must_use]
    pub const fn caller_location(&self) -> Option<Location> {
        self.caller_location
    }

    /// Removes a device. Its pending requests fail with
    /// [`Error::NotConnected`].
    pub fn forget(&mut self, mac: &MacAddress) -> Option<DeviceSession> {
        let mut session = self.sessions.remove(mac)?;
        self.by_peripheral.remove(&session.peripheral);
        session.pending.fail_all(|| Error::NotConnected);
        Some(session)
    }

    /// Ingests one advertisement.
    ///
    /// Advertisements that are not from a supported device are ignored.
    pub fn observe(
        &mut self,
        advertisement: &Advertisement,
        now: Instant,
        config: &ManagerConfig,
    ) -> Vec<Event> {
        let Some(identity) = decode_identity(advertisement) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mac = identity.mac.clone();
        let session = match self.sessions.entry(mac.clone()) {
            Entry::Occupied(entry) => {
                let session = entry.into_mut();
                if session.identity != identity {
                    tracing::debug!("{} now identifies as {}", mac, identity.model);
                    session.identity = identity;
                }
                session
            }
            Entry::Vacant(entry) => {
                tracing::debug!("discovered {} ({})", mac, identity.model);
                events.push(Event::DeviceDiscovered(identity.clone()));
                entry.insert(DeviceSession::new(
                    identity,
                    advertisement.peripheral.clone(),
                    now,
                ))
            }
        };

        if session.peripheral != advertisement.peripheral {
            self.by_peripheral.remove(&session.peripheral);
            session.peripheral = advertisement.peripheral.clone();
        }
        self.by_peripheral
            .insert(advertisement.peripheral.clone(), mac.clone());

        session.last_seen_at = now;
        events.extend(session.mark(true, true));

        let model = session.model();
        let data = advertisement.manufacturer_data.as_ref();

        if let Some(percent) = decode_battery(model, data) {
            if session.apply_battery(percent, config.battery_change_threshold) {
                events.push(Event::BatteryChanged {
                    mac: mac.clone(),
                    percent,
                });
            }
        }

        let previous = session.live_state.clone();
        decode_state(model, data, &mut session.live_state);
        let current = &session.live_state;
        if current.button != previous.button {
            events.push(Event::ButtonChanged {
                mac: mac.clone(),
                button: current.button,
            });
        }
        if current.buzz != previous.buzz {
            events.push(Event::BuzzChanged {
                mac: mac.clone(),
                buzz: current.buzz,
            });
        }
        if current.advertisement_rate != previous.advertisement_rate {
            events.push(Event::AdvertisementRateChanged {
                mac: mac.clone(),
                rate: current.advertisement_rate,
            });
        }

        if let Some(location) = self.caller_location {
            session.last_location = Some(location);
        }

        events.push(Event::DeviceUpdated { mac });
        events
    }

    /// Runs one out-of-range sweep.
    pub fn sweep(&mut self, now: Instant, config: &ManagerConfig) -> Vec<Event> {
        let mut events = Vec::new();
        let previous = self.last_sweep.replace(now);

        if previous.is_some_and(|last| now.saturating_duration_since(last) > config.watchdog_timeout)
        {
            tracing::debug!("sweep watchdog expired, marking every device out of range");
            for session in self.sessions.values_mut() {
                events.extend(session.mark(false, false));
            }
            return events;
        }

        let caller = self.caller_location;
        for session in self.sessions.values_mut() {
            let capabilities = session.model().capabilities();
            let connected = session.connection_state == ConnectionState::Connected;

            if connected && capabilities.auto_connectable {
                events.extend(session.mark(true, true));
                session.last_seen_at = now;
                events.push(Event::DeviceUpdated {
                    mac: session.mac().clone(),
                });
                continue;
            }

            if !session.in_range || connected {
                continue;
            }

            let elapsed = now.saturating_duration_since(session.last_seen_at);
            if elapsed <= capabilities.refresh_interval {
                continue;
            }

            let colocated = caller
                .zip(session.last_location)
                .is_some_and(|(caller, device)| {
                    caller.distance_to(&device) < config.colocated_radius_m
                });
            if colocated {
                tracing::trace!("{} silent but colocated with caller", session.mac());
                continue;
            }

            tracing::debug!("{} out of range after {:?}", session.mac(), elapsed);
            events.extend(session.mark(false, true));
        }

        events
    }
}
