//! Transport layer for Bluetooth LE communication.
//!
//! This module provides the abstraction the device manager drives. A real
//! application backs it with the platform BLE stack. The `mock` feature adds
//! `MockTransport`, an in-memory peripheral simulator.

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::Advertisement;
use crate::types::PeripheralId;

/// Whether a characteristic write expects an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// The transport resolves the write once the peripheral acknowledges it.
    WithResponse,
    /// The transport resolves the write as soon as it is queued.
    WithoutResponse,
}

/// Availability of the local Bluetooth central.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CentralState {
    /// State not reported yet.
    #[default]
    Unknown,
    /// No Bluetooth hardware.
    Unsupported,
    /// The application may not use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and usable.
    PoweredOn,
}

impl CentralState {
    /// Returns false only when the application was denied Bluetooth access.
    #[must_use]
    pub const fn is_authorized(self) -> bool {
        !matches!(self, Self::Unauthorized)
    }
}

/// Unsolicited events reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An advertisement was received.
    Advertisement(Advertisement),
    /// A peripheral dropped its connection.
    Disconnected {
        /// The peripheral that disconnected.
        peripheral: PeripheralId,
    },
    /// The central changed state.
    CentralStateChanged(CentralState),
}

/// Trait for transport implementations.
///
/// All methods take `&self`; implementations are shared between the manager's
/// background tasks and concurrent firmware updates.
pub trait Transport: Send + Sync {
    /// Returns the current central state.
    fn central_state(&self) -> BoxFuture<'_, CentralState>;

    /// Connects to a peripheral.
    fn connect<'a>(&'a self, peripheral: &'a PeripheralId) -> BoxFuture<'a, Result<()>>;

    /// Disconnects from a peripheral.
    fn disconnect<'a>(&'a self, peripheral: &'a PeripheralId) -> BoxFuture<'a, Result<()>>;

    /// Discovers `services` and returns every characteristic found in them.
    fn discover<'a>(
        &'a self,
        peripheral: &'a PeripheralId,
        services: &'a [Uuid],
    ) -> BoxFuture<'a, Result<Vec<Uuid>>>;

    /// Writes a characteristic value.
    fn write<'a>(
        &'a self,
        peripheral: &'a PeripheralId,
        characteristic: Uuid,
        data: Bytes,
        mode: WriteMode,
    ) -> BoxFuture<'a, Result<()>>;

    /// Reads a characteristic value.
    fn read<'a>(
        &'a self,
        peripheral: &'a PeripheralId,
        characteristic: Uuid,
    ) -> BoxFuture<'a, Result<Bytes>>;

    /// Subscribes to notifications of a characteristic.
    fn subscribe<'a>(
        &'a self,
        peripheral: &'a PeripheralId,
        characteristic: Uuid,
    ) -> BoxFuture<'a, Result<BoxStream<'static, Bytes>>>;

    /// Returns the stream of unsolicited transport events.
    fn events(&self) -> BoxStream<'static, TransportEvent>;
}

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;
