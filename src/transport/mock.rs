//! In-memory peripheral simulator.
//!
//! [`MockTransport`] records every write, answers reads from a script and can
//! emulate the Toshiba flash storage service closely enough to run a complete
//! firmware update against it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::Advertisement;
use crate::protocol::codec::read_be_u32;
use crate::protocol::uuids::{CHECKSUM1, CHECKSUM2, ERASE, MEMORY_WRITE};
use crate::transport::{CentralState, Transport, TransportEvent, WriteMode};
use crate::types::PeripheralId;

/// Flash page size used by the erase emulation.
const PAGE_SIZE: u32 = 0x1000;

/// A write captured by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Target peripheral.
    pub peripheral: PeripheralId,
    /// Target characteristic.
    pub characteristic: Uuid,
    /// Written bytes.
    pub payload: Bytes,
    /// Requested write mode.
    pub mode: WriteMode,
}

#[derive(Default)]
struct MockState {
    central: CentralState,
    connect_delay: Option<Duration>,
    fail_connect: bool,
    connected: HashSet<PeripheralId>,
    characteristics: Vec<Uuid>,
    writes: Vec<RecordedWrite>,
    failing_writes: HashSet<Uuid>,
    stalled_writes: HashSet<Uuid>,
    reads: HashMap<Uuid, VecDeque<Bytes>>,
    replies: Vec<(Uuid, Bytes, Uuid, Bytes)>,
    subscribers: HashMap<(PeripheralId, Uuid), Vec<mpsc::UnboundedSender<Bytes>>>,
    flash: Option<BTreeMap<u32, u8>>,
    checksum_replies: VecDeque<Bytes>,
    corrupt_checksums: bool,
}

/// In-memory [`Transport`] for tests and demos.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a powered-on mock that exposes no characteristics.
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = MockState {
            central: CentralState::PoweredOn,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            events_tx,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the central state reported to the manager.
    pub fn set_central_state(&self, central: CentralState) {
        self.state().central = central;
        let _ = self
            .events_tx
            .send(TransportEvent::CentralStateChanged(central));
    }

    /// Sets the characteristics returned by service discovery.
    pub fn set_characteristics(&self, characteristics: &[Uuid]) {
        self.state().characteristics = characteristics.to_vec();
    }

    /// Delays every connect by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = Some(delay);
    }

    /// Makes every connect fail.
    pub fn fail_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    /// Makes writes to `characteristic` fail.
    pub fn fail_writes_to(&self, characteristic: Uuid) {
        self.state().failing_writes.insert(characteristic);
    }

    /// Makes writes to `characteristic` never complete.
    pub fn stall_writes_to(&self, characteristic: Uuid) {
        self.state().stalled_writes.insert(characteristic);
    }

    /// Queues a value for the next read of `characteristic`.
    pub fn push_read(&self, characteristic: Uuid, value: impl Into<Bytes>) {
        self.state()
            .reads
            .entry(characteristic)
            .or_default()
            .push_back(value.into());
    }

    /// Sends `response` as a notification on `notify_on` whenever `request`
    /// is written to `written_to`.
    pub fn reply_on_write(
        &self,
        written_to: Uuid,
        request: impl Into<Bytes>,
        notify_on: Uuid,
        response: impl Into<Bytes>,
    ) {
        self.state()
            .replies
            .push((written_to, request.into(), notify_on, response.into()));
    }

    /// Emulates the Toshiba storage service: memory writes are kept, erases
    /// clear pages and checksum requests are answered on read-back.
    pub fn emulate_flash(&self) {
        self.state().flash = Some(BTreeMap::new());
    }

    /// Makes the flash emulation answer checksum requests with a wrong sum.
    pub fn corrupt_checksums(&self, corrupt: bool) {
        self.state().corrupt_checksums = corrupt;
    }

    /// Returns the byte stored at `address` by the flash emulation.
    #[must_use]
    pub fn flash_byte(&self, address: u32) -> Option<u8> {
        self.state().flash.as_ref()?.get(&address).copied()
    }

    /// Returns every recorded write.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state().writes.clone()
    }

    /// Returns the recorded writes to `characteristic`.
    #[must_use]
    pub fn writes_to(&self, characteristic: Uuid) -> Vec<RecordedWrite> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.characteristic == characteristic)
            .cloned()
            .collect()
    }

    /// Returns true if `peripheral` is connected.
    #[must_use]
    pub fn is_connected(&self, peripheral: &PeripheralId) -> bool {
        self.state().connected.contains(peripheral)
    }

    /// Delivers a notification to every subscriber of `characteristic`.
    pub fn notify(&self, peripheral: &PeripheralId, characteristic: Uuid, value: impl Into<Bytes>) {
        let value = value.into();
        let mut state = self.state();
        if let Some(senders) = state.subscribers.get_mut(&(peripheral.clone(), characteristic)) {
            senders.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }

    /// Injects an advertisement.
    pub fn advertise(&self, advertisement: Advertisement) {
        let _ = self
            .events_tx
            .send(TransportEvent::Advertisement(advertisement));
    }

    /// Simulates the peripheral dropping its connection.
    pub fn drop_connection(&self, peripheral: &PeripheralId) {
        self.state().connected.remove(peripheral);
        let _ = self.events_tx.send(TransportEvent::Disconnected {
            peripheral: peripheral.clone(),
        });
    }

    fn apply_flash(state: &mut MockState, characteristic: Uuid, payload: &[u8]) {
        let corrupt = state.corrupt_checksums;
        let Some(flash) = state.flash.as_mut() else {
            return;
        };
        let Some(address) = read_be_u32(payload, 0) else {
            return;
        };

        if characteristic == MEMORY_WRITE {
            for (offset, byte) in payload[4..].iter().enumerate() {
                flash.insert(address.wrapping_add(offset as u32), *byte);
            }
        } else if characteristic == ERASE {
            let end = address.saturating_add(PAGE_SIZE);
            let erased: Vec<u32> = flash.range(address..end).map(|(a, _)| *a).collect();
            for a in erased {
                flash.remove(&a);
            }
        } else if characteristic == CHECKSUM1 {
            let size = read_be_u32(payload, 4).unwrap_or(0);
            let end = address.saturating_add(size);
            let mut sum = flash
                .range(address..end)
                .fold(0u32, |acc, (_, b)| acc.wrapping_add(u32::from(*b)));
            if corrupt {
                sum = sum.wrapping_add(1);
            }
            state
                .checksum_replies
                .push_back(Bytes::copy_from_slice(&sum.to_be_bytes()));
        }
    }
}

fn unbounded_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

impl Transport for MockTransport {
    fn central_state(&self) -> BoxFuture<'_, CentralState> {
        Box::pin(async move { self.state().central })
    }

    fn connect<'a>(&'a self, peripheral: &'a PeripheralId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (delay, fail) = {
                let state = self.state();
                (state.connect_delay, state.fail_connect)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(Error::Transport {
                    message: format!("connect to {peripheral} refused"),
                });
            }
            self.state().connected.insert(peripheral.clone());
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self, peripheral: &'a PeripheralId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state();
            state.connected.remove(peripheral);
            state
                .subscribers
                .retain(|(p, _), _| p != peripheral);
            Ok(())
        })
    }

    fn discover<'a>(
        &'a self,
        peripheral: &'a PeripheralId,
        _services: &'a [Uuid],
    ) -> BoxFuture<'a, Result<Vec<Uuid>>> {
        Box::pin(async move {
            let state = self.state();
            if !state.connected.contains(peripheral) {
                return Err(Error::NotConnected);
            }
            Ok(state.characteristics.clone())
        })
    }

    fn write<'a>(
        &'a self,
        peripheral: &'a PeripheralId,
        characteristic: Uuid,
        data: Bytes,
        mode: WriteMode,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let stalled = {
                let mut state = self.state();
                state.writes.push(RecordedWrite {
                    peripheral: peripheral.clone(),
                    characteristic,
                    payload: data.clone(),
                    mode,
                });
                if state.failing_writes.contains(&characteristic) {
                    return Err(Error::WriteFailed {
                        message: format!("write to {characteristic} rejected"),
                    });
                }
                state.stalled_writes.contains(&characteristic)
            };
            if stalled {
                futures::future::pending::<()>().await;
            }

            let notifications: Vec<(Uuid, Bytes)> = {
                let mut state = self.state();
                Self::apply_flash(&mut state, characteristic, &data);
                state
                    .replies
                    .iter()
                    .filter(|(to, request, _, _)| *to == characteristic && *request == data)
                    .map(|(_, _, on, response)| (*on, response.clone()))
                    .collect()
            };
            for (on, response) in notifications {
                self.notify(peripheral, on, response);
            }
            Ok(())
        })
    }

    fn read<'a>(
        &'a self,
        _peripheral: &'a PeripheralId,
        characteristic: Uuid,
    ) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let mut state = self.state();
            if characteristic == CHECKSUM2 && state.flash.is_some() {
                if let Some(reply) = state.checksum_replies.pop_front() {
                    return Ok(reply);
                }
            }
            state
                .reads
                .get_mut(&characteristic)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| Error::ReadFailed {
                    message: format!("no value scripted for {characteristic}"),
                })
        })
    }

    fn subscribe<'a>(
        &'a self,
        peripheral: &'a PeripheralId,
        characteristic: Uuid,
    ) -> BoxFuture<'a, Result<BoxStream<'static, Bytes>>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.state()
                .subscribers
                .entry((peripheral.clone(), characteristic))
                .or_default()
                .push(tx);
            Ok(unbounded_stream(rx))
        })
    }

    fn events(&self) -> BoxStream<'static, TransportEvent> {
        let rx = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match rx {
            Some(rx) => unbounded_stream(rx),
            None => Box::pin(stream::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::protocol::uuids::DATA3;

    #[tokio::test]
    async fn test_records_writes() {
        let mock = MockTransport::new();
        let p = PeripheralId::from("p");
        mock.write(&p, DATA3, Bytes::from_static(&[1, 2]), WriteMode::WithResponse)
            .await
            .unwrap();

        let writes = mock.writes_to(DATA3);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload.as_ref(), &[1, 2]);
    }

    #[tokio::test]
    async fn test_reply_on_write() {
        let mock = MockTransport::new();
        let p = PeripheralId::from("p");
        mock.reply_on_write(DATA3, vec![8, 4, 0], DATA3, vec![8, 4, 0, 1]);

        let mut stream = mock.subscribe(&p, DATA3).await.unwrap();
        mock.write(&p, DATA3, Bytes::from_static(&[8, 4, 0]), WriteMode::WithResponse)
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().as_ref(), &[8, 4, 0, 1]);
    }

    #[tokio::test]
    async fn test_flash_checksum() {
        let mock = MockTransport::new();
        let p = PeripheralId::from("p");
        mock.emulate_flash();

        let mut frame = 0x6000u32.to_be_bytes().to_vec();
        frame.extend_from_slice(&[1, 2, 3]);
        mock.write(&p, MEMORY_WRITE, frame.into(), WriteMode::WithResponse)
            .await
            .unwrap();

        let mut request = 0x6000u32.to_be_bytes().to_vec();
        request.extend_from_slice(&3u32.to_be_bytes());
        mock.write(&p, CHECKSUM1, request.into(), WriteMode::WithResponse)
            .await
            .unwrap();

        let reply = mock.read(&p, CHECKSUM2).await.unwrap();
        assert_eq!(reply.as_ref(), &6u32.to_be_bytes());
        assert_eq!(mock.flash_byte(0x6001), Some(2));
    }

    #[tokio::test]
    async fn test_unscripted_read_fails() {
        let mock = MockTransport::new();
        let p = PeripheralId::from("p");
        assert!(mock.read(&p, DATA3).await.is_err());
    }
}
