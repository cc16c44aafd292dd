//! Data types for Pebblebee devices.
//!
//! This module contains the core data structures used throughout the library:
//! - Hardware models and their capabilities
//! - Device identity (MAC address, beacon ids)
//! - Live state decoded from advertisements
//! - Locations
//! - Device settings

pub mod identity;
pub mod location;
pub mod model;
pub mod settings;
pub mod state;

pub use identity::{BeaconId, DeviceIdentity, MacAddress, PeripheralId};
pub use location::Location;
pub use model::{BatterySource, Capabilities, DeviceModel, ModelFamily, StateLayout};
pub use settings::{ChargingStatus, LteStatus, TrackingMode, Volume};
pub use state::{
    ActionSequence, AdvertisementRate, BondingState, ButtonState, BuzzState, ConnectionState,
    FirmwareHint, LiveState, MfiFlags,
};
