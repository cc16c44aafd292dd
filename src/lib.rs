//! # pebblebee
//!
//! A Rust device-management library for Pebblebee BLE finder tags.
//!
//! This library discovers tags from their advertisements, tracks per-device
//! state, sends commands and pushes firmware to Toshiba-based models over the
//! dual-bank OTA protocol.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Event-driven architecture for device notifications
//! - Pure advertisement decoding for every supported model
//! - Pluggable BLE transport, with an in-memory simulator behind the `mock`
//!   feature
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pebblebee::{DeviceManager, Event, ManagerConfig, Transport};
//!
//! // `transport` wraps the platform BLE stack.
//! async fn find_tags<T: Transport + 'static>(transport: Arc<T>) -> Result<(), pebblebee::Error> {
//!     let mut manager = DeviceManager::new(transport, ManagerConfig::default());
//!     manager.start();
//!
//!     let mut events = manager.subscribe(None);
//!     while let Some(event) = events.recv().await {
//!         if let Event::DeviceDiscovered(identity) = event {
//!             println!("Found {} ({})", identity.mac, identity.model);
//!             manager.buzz(&identity.mac).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Advertisement decoding, GATT identifiers, command payloads
//! - [`types`] - Data structures (models, identity, live state, settings)
//! - [`transport`] - The [`Transport`] trait and the optional `MockTransport`
//! - [`event`] - Async event system for device notifications
//! - [`session`] - Per-device sessions and pending requests
//! - [`registry`] - Advertisement ingestion and the out-of-range sweep
//! - [`ota`] - Firmware images, flash layout and the OTA engine
//! - [`manager`] - High-level [`DeviceManager`]

pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod ota;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::ManagerConfig;
pub use error::{CodecError, Error, FirmwareError, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use manager::{DeviceManager, HardwareRevision};
pub use ota::{Bank, FirmwareUpdateHandle, FirmwareUpdateOptions};
pub use protocol::{Advertisement, CellularQuery, DeviceCommand, QueryResponse};
pub use session::{DeviceSnapshot, RequestKind};
#[cfg(any(test, feature = "mock"))]
pub use transport::MockTransport;
pub use transport::{CentralState, Transport, TransportEvent, WriteMode};
pub use types::{
    AdvertisementRate, ButtonState, BuzzState, ChargingStatus, ConnectionState, DeviceIdentity,
    DeviceModel, Location, LteStatus, MacAddress, PeripheralId, TrackingMode, Volume,
};
