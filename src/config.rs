//! Device manager configuration.

use std::time::Duration;

/// Default period of the out-of-range sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Default gap after which a sweep assumes the process was suspended.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Default distance under which a silent device is assumed to still be with
/// the caller.
pub const DEFAULT_COLOCATED_RADIUS_M: f64 = 150.0;

/// Default battery delta (percentage points) that triggers a notification.
pub const DEFAULT_BATTERY_CHANGE_THRESHOLD: f64 = 5.0;

/// Default timeout for requests answered by a notification.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for acknowledged writes and reads.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for connect plus service discovery.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Period of the out-of-range sweep.
    pub sweep_interval: Duration,
    /// A sweep arriving later than this after the previous one marks every
    /// device out of range without alerting.
    pub watchdog_timeout: Duration,
    /// Caller and device closer than this (meters) suppress out-of-range.
    pub colocated_radius_m: f64,
    /// Battery delta that triggers a [`BatteryChanged`](crate::Event::BatteryChanged).
    pub battery_change_threshold: f64,
    /// Timeout for cellular queries.
    pub request_timeout: Duration,
    /// Timeout for commands, reads and firmware update steps.
    pub command_timeout: Duration,
    /// Timeout for connect plus discovery.
    pub connect_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            colocated_radius_m: DEFAULT_COLOCATED_RADIUS_M,
            battery_change_threshold: DEFAULT_BATTERY_CHANGE_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the sweep interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the watchdog timeout.
    #[must_use]
    pub const fn watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    /// Sets the colocation radius in meters.
    #[must_use]
    pub const fn colocated_radius_m(mut self, radius: f64) -> Self {
        self.colocated_radius_m = radius;
        self
    }

    /// Sets the battery change threshold.
    #[must_use]
    pub const fn battery_change_threshold(mut self, threshold: f64) -> Self {
        self.battery_change_threshold = threshold;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the command timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
