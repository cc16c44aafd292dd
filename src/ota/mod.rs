//! Firmware updates for Toshiba-based models.
//!
//! The update runs as a strict sequence of acknowledged writes: version
//! check, flash open, boot flag read, page erase, the main write loop, two
//! checksum verifications, the image header, the boot flag switch and the
//! flash close. [`OtaContext`] sequences the protocol without I/O and
//! [`engine::run`] drives it over a [`Transport`].

pub mod engine;
pub mod image;
pub mod layout;
pub mod machine;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use image::{FirmwareImage, HexRecord, RecordType};
pub use layout::{AppRegion, Bank};
pub use machine::{OtaContext, Phase, Step};

use crate::error::FirmwareError;
use crate::protocol::uuids::{
    CHECK_FLAG, CHECKSUM1, CHECKSUM2, ERASE, FLAG_CHANGE, FLASH_CLOSE, FLASH_OPEN, MEMORY_WRITE,
    VERSION_CHECK,
};
use crate::transport::Transport;
use crate::types::PeripheralId;

/// Storage characteristics an update writes or reads.
pub const REQUIRED_CHARACTERISTICS: [Uuid; 9] = [
    VERSION_CHECK,
    FLASH_OPEN,
    CHECK_FLAG,
    ERASE,
    MEMORY_WRITE,
    CHECKSUM1,
    CHECKSUM2,
    FLAG_CHANGE,
    FLASH_CLOSE,
];

/// Options for a firmware update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareUpdateOptions {
    /// Flash bank receiving the image.
    pub bank: Bank,
}

impl FirmwareUpdateOptions {
    /// Selects the target bank.
    #[must_use]
    pub const fn bank(mut self, bank: Bank) -> Self {
        self.bank = bank;
        self
    }
}

/// A running firmware update.
///
/// Dropping the handle does not stop the update; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct FirmwareUpdateHandle {
    progress: mpsc::UnboundedReceiver<u8>,
    cancel: Arc<Notify>,
    task: JoinHandle<Result<(), FirmwareError>>,
}

impl FirmwareUpdateHandle {
    /// Validates `image` and starts the update on its own task.
    ///
    /// `on_progress` sees the same values as [`next_progress`](Self::next_progress);
    /// `on_finish` runs once with the outcome.
    pub fn spawn<T>(
        transport: Arc<T>,
        peripheral: PeripheralId,
        image: &[u8],
        options: FirmwareUpdateOptions,
        step_timeout: Duration,
        mut on_progress: impl FnMut(u8) + Send + 'static,
        on_finish: impl FnOnce(&Result<(), FirmwareError>) + Send + 'static,
    ) -> Result<Self, FirmwareError>
    where
        T: Transport + ?Sized + 'static,
    {
        let context = OtaContext::new(image, options.bank)?;
        let cancel = Arc::new(Notify::new());
        let (tx, progress) = mpsc::unbounded_channel();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let report = move |percent: u8| {
                    let _ = tx.send(percent);
                    on_progress(percent);
                };
                let result = engine::run(
                    transport.as_ref(),
                    &peripheral,
                    context,
                    step_timeout,
                    &cancel,
                    report,
                )
                .await;
                on_finish(&result);
                result
            })
        };

        Ok(Self {
            progress,
            cancel,
            task,
        })
    }

    /// Receives the next progress value, or `None` once the update ended.
    pub async fn next_progress(&mut self) -> Option<u8> {
        self.progress.recv().await
    }

    /// Requests cancellation. The update ends with
    /// [`FirmwareError::Cancelled`] unless it already terminated.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// Returns true once the update task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the update to terminate.
    pub async fn wait(self) -> Result<(), FirmwareError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("firmware update task failed: {}", e);
                Err(FirmwareError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ota::machine::tests::app0_image;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn test_handle_reports_progress_and_result() {
        let mock = Arc::new(MockTransport::new());
        let peripheral = PeripheralId::from("found");
        mock.connect(&peripheral).await.unwrap();
        mock.emulate_flash();

        let mut handle = FirmwareUpdateHandle::spawn(
            mock.clone(),
            peripheral,
            &app0_image(20),
            FirmwareUpdateOptions::default().bank(Bank::B),
            Duration::from_secs(5),
            |_| {},
            |_| {},
        )
        .unwrap();

        let mut last = 0;
        while let Some(percent) = handle.next_progress().await {
            assert!(percent > last);
            last = percent;
        }
        assert_eq!(last, 100);
        assert!(handle.wait().await.is_ok());
        assert_eq!(mock.flash_byte(0x18000 + 5), Some(5));
    }

    #[tokio::test]
    async fn test_invalid_image_is_rejected_up_front() {
        let result = FirmwareUpdateHandle::spawn(
            Arc::new(MockTransport::new()),
            PeripheralId::from("found"),
            &[0xC3, 0x28],
            FirmwareUpdateOptions::default(),
            Duration::from_secs(5),
            |_| {},
            |_| {},
        );
        assert!(matches!(
            result,
            Err(FirmwareError::CorruptedImage { line: 0, .. })
        ));
    }
}
