//! Async driver that runs an [`OtaContext`] against a [`Transport`].

use std::future::Future;
use std::time::Duration;

use tokio::sync::Notify;

use super::machine::{OtaContext, Phase, Step};
use crate::error::{Error, FirmwareError};
use crate::transport::{Transport, WriteMode};
use crate::types::PeripheralId;

/// Emits each progress value once, never going backwards.
struct ProgressReporter<F> {
    last: Option<u8>,
    report: F,
}

impl<F: FnMut(u8)> ProgressReporter<F> {
    const fn new(report: F) -> Self {
        Self { last: None, report }
    }

    fn emit(&mut self, percent: u8) {
        if self.last.is_none_or(|last| percent > last) {
            self.last = Some(percent);
            (self.report)(percent);
        }
    }
}

enum Outcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

async fn guarded<T>(
    cancel: &Notify,
    timeout: Duration,
    future: impl Future<Output = T>,
) -> Outcome<T> {
    tokio::select! {
        biased;
        () = cancel.notified() => Outcome::Cancelled,
        result = tokio::time::timeout(timeout, future) => match result {
            Ok(value) => Outcome::Completed(value),
            Err(_) => Outcome::TimedOut,
        },
    }
}

fn timeout_error(timeout: Duration) -> FirmwareError {
    FirmwareError::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

fn transport_error(error: &Error, fallback: FirmwareError) -> FirmwareError {
    match error {
        Error::NotConnected | Error::ConnectionFailed => FirmwareError::ConnectionFailed,
        Error::UnknownDeviceState => FirmwareError::UnknownDeviceState,
        _ => fallback,
    }
}

/// Runs `context` to completion.
///
/// Every write and read is bounded by `step_timeout`. Notifying `cancel`
/// aborts the update with [`FirmwareError::Cancelled`] after a best-effort
/// close of the flash.
pub async fn run<T, F>(
    transport: &T,
    peripheral: &PeripheralId,
    mut context: OtaContext,
    step_timeout: Duration,
    cancel: &Notify,
    report: F,
) -> Result<(), FirmwareError>
where
    T: Transport + ?Sized,
    F: FnMut(u8),
{
    let mut progress = ProgressReporter::new(report);
    let mut step = context.start();
    tracing::debug!("firmware update for {} on {}", peripheral, context.bank());

    loop {
        step = match step {
            Step::Write {
                characteristic,
                payload,
                progress: percent,
            } => {
                if let Some(percent) = percent {
                    progress.emit(percent);
                }
                tracing::trace!("ota write {} ({} bytes)", characteristic, payload.len());
                let write =
                    transport.write(peripheral, characteristic, payload, WriteMode::WithResponse);
                match guarded(cancel, step_timeout, write).await {
                    Outcome::Completed(Ok(())) => context.on_write_ack()?,
                    Outcome::Completed(Err(e)) => {
                        tracing::warn!("ota write to {} failed: {}", characteristic, e);
                        return Err(context.fail(transport_error(&e, FirmwareError::WriteFailed)));
                    }
                    Outcome::TimedOut => return Err(context.fail(timeout_error(step_timeout))),
                    Outcome::Cancelled => {
                        return Err(abort(transport, peripheral, &mut context, step_timeout).await);
                    }
                }
            }
            Step::Read { characteristic } => {
                let read = transport.read(peripheral, characteristic);
                match guarded(cancel, step_timeout, read).await {
                    Outcome::Completed(Ok(value)) => context.on_read(&value)?,
                    Outcome::Completed(Err(e)) => {
                        tracing::warn!("ota read of {} failed: {}", characteristic, e);
                        return Err(context.fail(transport_error(&e, FirmwareError::ReadFailed)));
                    }
                    Outcome::TimedOut => return Err(context.fail(timeout_error(step_timeout))),
                    Outcome::Cancelled => {
                        return Err(abort(transport, peripheral, &mut context, step_timeout).await);
                    }
                }
            }
            Step::Done => {
                return match context.phase() {
                    Phase::Succeeded => {
                        progress.emit(100);
                        tracing::debug!("firmware update for {} succeeded", peripheral);
                        Ok(())
                    }
                    Phase::Failed(error) => Err(error.clone()),
                    _ => Err(FirmwareError::UnknownDeviceState),
                };
            }
        };
    }
}

async fn abort<T: Transport + ?Sized>(
    transport: &T,
    peripheral: &PeripheralId,
    context: &mut OtaContext,
    step_timeout: Duration,
) -> FirmwareError {
    if let Some(Step::Write {
        characteristic,
        payload,
        ..
    }) = context.cancel()
    {
        let close = transport.write(peripheral, characteristic, payload, WriteMode::WithResponse);
        match tokio::time::timeout(step_timeout, close).await {
            Ok(Ok(())) => tracing::debug!("flash closed after cancel"),
            Ok(Err(e)) => tracing::warn!("close after cancel failed: {}", e),
            Err(_) => tracing::warn!("close after cancel timed out"),
        }
    }
    FirmwareError::Cancelled
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ota::layout::Bank;
    use crate::ota::machine::tests::app0_image;
    use crate::protocol::uuids::{ERASE, FLASH_CLOSE, FLASH_OPEN, MEMORY_WRITE};
    use crate::transport::MockTransport;

    const STEP_TIMEOUT: Duration = Duration::from_secs(5);

    async fn connected_mock() -> (MockTransport, PeripheralId) {
        let mock = MockTransport::new();
        let peripheral = PeripheralId::from("found");
        mock.connect(&peripheral).await.unwrap();
        mock.emulate_flash();
        (mock, peripheral)
    }

    #[tokio::test]
    async fn test_full_update_against_emulated_flash() {
        let (mock, peripheral) = connected_mock().await;
        let context = OtaContext::new(&app0_image(300), Bank::A).unwrap();
        let cancel = Notify::new();
        let mut seen = Vec::new();

        run(&mock, &peripheral, context, STEP_TIMEOUT, &cancel, |p| {
            seen.push(p);
        })
        .await
        .unwrap();

        assert_eq!(seen.first(), Some(&1));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        for checkpoint in [2, 3, 10, 92, 94, 96, 98, 99] {
            assert!(seen.contains(&checkpoint), "missing {checkpoint}");
        }

        assert_eq!(mock.flash_byte(0x6000), Some(0));
        assert_eq!(mock.flash_byte(0x6000 + 17), Some(17));
        let close = mock.writes_to(FLASH_CLOSE);
        assert_eq!(close.len(), 1);
        assert_eq!(close[0].payload.as_ref(), &[0x01]);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_aborts_before_finalize() {
        let (mock, peripheral) = connected_mock().await;
        mock.corrupt_checksums(true);
        let context = OtaContext::new(&app0_image(4), Bank::A).unwrap();
        let mut seen = Vec::new();

        let error = run(&mock, &peripheral, context, STEP_TIMEOUT, &Notify::new(), |p| {
            seen.push(p);
        })
        .await
        .unwrap_err();

        assert!(matches!(error, FirmwareError::ChecksumMismatch { .. }));
        assert!(!seen.contains(&100));
        assert!(mock.writes_to(FLASH_CLOSE).is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_terminal() {
        let (mock, peripheral) = connected_mock().await;
        mock.fail_writes_to(ERASE);
        let context = OtaContext::new(&app0_image(1), Bank::A).unwrap();

        let error = run(&mock, &peripheral, context, STEP_TIMEOUT, &Notify::new(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(error, FirmwareError::WriteFailed);
        assert_eq!(mock.writes_to(ERASE).len(), 1);
        assert!(mock.writes_to(MEMORY_WRITE).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let (mock, peripheral) = connected_mock().await;
        mock.stall_writes_to(FLASH_OPEN);
        let context = OtaContext::new(&app0_image(1), Bank::A).unwrap();

        let error = run(&mock, &peripheral, context, STEP_TIMEOUT, &Notify::new(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(error, FirmwareError::Timeout { timeout_ms: 5000 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_closes_flash() {
        let (mock, peripheral) = connected_mock().await;
        mock.stall_writes_to(MEMORY_WRITE);
        let context = OtaContext::new(&app0_image(8), Bank::A).unwrap();
        let cancel = Arc::new(Notify::new());

        let task = {
            let mock = mock.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run(&mock, &peripheral, context, STEP_TIMEOUT, &cancel, |_| {}).await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.writes_to(MEMORY_WRITE).len(), 1);
        cancel.notify_one();

        assert_eq!(task.await.unwrap(), Err(FirmwareError::Cancelled));
        let close = mock.writes_to(FLASH_CLOSE);
        assert_eq!(close.len(), 1);
        assert_eq!(close[0].payload.as_ref(), &[0x01]);
    }

    #[test]
    fn test_progress_reporter_dedupes() {
        let mut seen = Vec::new();
        let mut reporter = ProgressReporter::new(|p| seen.push(p));
        for p in [1, 1, 2, 10, 10, 10, 9, 11] {
            reporter.emit(p);
        }
        assert_eq!(seen, vec![1, 2, 10, 11]);
    }
}
