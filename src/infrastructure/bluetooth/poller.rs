//! Periodic telemetry polling
//!
//! One task per link. Reads are strictly sequential: the next read is
//! scheduled only after the previous one finished, successfully or not.

use crate::domain::models::SessionEvent;
use crate::domain::settings::LinkSettings;
use crate::domain::telemetry::TelemetryReport;
use crate::infrastructure::bluetooth::error::SessionError;
use crate::infrastructure::bluetooth::protocol::{self, GattTarget};
use crate::infrastructure::bluetooth::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between the end of one read and the start of the next
    pub poll_interval: Duration,
    /// Upper bound on a single characteristic read
    pub io_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            io_timeout: Duration::from_millis(3000),
        }
    }
}

impl From<&LinkSettings> for PollerConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            io_timeout: Duration::from_millis(settings.io_timeout_ms),
        }
    }
}

/// Everything a poll needs, cloned into the task
#[derive(Clone)]
pub struct PollTarget {
    pub transport: Arc<dyn Transport>,
    pub device_id: String,
    pub characteristic: GattTarget,
}

/// Read one telemetry frame and publish it.
///
/// On any failure the previous snapshot stays in place.
pub async fn poll_once(
    target: &PollTarget,
    io_timeout: Duration,
    telemetry: &watch::Sender<TelemetryReport>,
    event_sender: &broadcast::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    let read = target
        .transport
        .read_characteristic(&target.device_id, target.characteristic);
    let bytes = tokio::time::timeout(io_timeout, read)
        .await
        .map_err(|_| SessionError::Timeout {
            operation: "telemetry read",
            after: io_timeout,
        })??;

    match protocol::decode_telemetry(&bytes) {
        Ok(report) => {
            telemetry.send_replace(report);
            Ok(())
        }
        Err(e) => {
            let _ = event_sender.send(SessionEvent::TelemetryDecodeFailed(e.to_string()));
            Err(e.into())
        }
    }
}

/// Handle to a running polling task
pub struct TelemetryPoller {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryPoller {
    pub fn spawn(
        target: PollTarget,
        config: PollerConfig,
        telemetry: Arc<watch::Sender<TelemetryReport>>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        info!(
            "Polling telemetry from {} every {:?}",
            target.device_id, config.poll_interval
        );

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = poll_once(&target, config.io_timeout, &telemetry, &event_sender) => {
                        if let Err(e) = result {
                            warn!("Telemetry poll failed, keeping last snapshot: {}", e);
                        }
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
            debug!("Telemetry polling stopped for {}", target.device_id);
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the task and wait for it to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Telemetry poller ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for TelemetryPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::error::DecodeError;
    use crate::infrastructure::bluetooth::protocol::GattProfile;
    use crate::infrastructure::bluetooth::simulator::SimulatedController;

    async fn linked_controller() -> Arc<SimulatedController> {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        controller.connect("AA").await.unwrap();
        controller
    }

    fn target(controller: &Arc<SimulatedController>) -> PollTarget {
        PollTarget {
            transport: controller.clone(),
            device_id: "AA".to_string(),
            characteristic: GattProfile::default().periodic_target(),
        }
    }

    fn frame_with_voltage(voltage_x10: u16) -> Vec<u8> {
        let mut frame = vec![0u8; protocol::TELEMETRY_FRAME_SIZE];
        frame[0..2].copy_from_slice(&voltage_x10.to_le_bytes());
        frame
    }

    #[tokio::test]
    async fn test_bad_frame_keeps_previous_snapshot() {
        let controller = linked_controller().await;
        let (telemetry, _) = watch::channel(TelemetryReport::default());
        let (events, mut receiver) = broadcast::channel(16);
        let timeout = Duration::from_secs(1);

        controller.queue_periodic_frame(frame_with_voltage(480));
        controller.queue_periodic_frame(vec![0u8; 20]);

        poll_once(&target(&controller), timeout, &telemetry, &events)
            .await
            .unwrap();
        assert!((telemetry.borrow().battery_voltage - 48.0).abs() < 1e-4);

        let result = poll_once(&target(&controller), timeout, &telemetry, &events).await;
        assert!(matches!(
            result,
            Err(SessionError::Decode(DecodeError::SizeMismatch { actual: 20, .. }))
        ));
        assert!((telemetry.borrow().battery_voltage - 48.0).abs() < 1e-4);
        match receiver.try_recv() {
            Ok(SessionEvent::TelemetryDecodeFailed(reason)) => {
                assert!(reason.contains("got 20"), "unexpected reason: {reason}")
            }
            other => panic!("expected a decode failure event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let controller = linked_controller().await;
        controller.hang_reads(true);
        let (telemetry, _) = watch::channel(TelemetryReport::default());
        let (events, _) = broadcast::channel(16);

        let result = poll_once(
            &target(&controller),
            Duration::from_secs(3),
            &telemetry,
            &events,
        )
        .await;
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_fixed_interval() {
        let controller = linked_controller().await;
        controller.set_periodic_frame(frame_with_voltage(365));
        let (telemetry, _) = watch::channel(TelemetryReport::default());
        let telemetry = Arc::new(telemetry);
        let (events, _) = broadcast::channel(16);

        let poller = TelemetryPoller::spawn(
            target(&controller),
            PollerConfig::default(),
            Arc::clone(&telemetry),
            events,
        );

        // Reads at t = 0, 1s, 2s, 3s
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(poller.is_running());
        assert_eq!(controller.periodic_reads(), 4);
        assert!((telemetry.borrow().battery_voltage - 36.5).abs() < 1e-4);

        poller.stop().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(controller.periodic_reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_do_not_stop_polling() {
        let controller = linked_controller().await;
        let (telemetry, _) = watch::channel(TelemetryReport::default());
        let (events, _) = broadcast::channel(16);
        controller.queue_periodic_frame(vec![1, 2, 3]);

        let poller = TelemetryPoller::spawn(
            target(&controller),
            PollerConfig::default(),
            Arc::new(telemetry),
            events,
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(controller.periodic_reads(), 2);
        poller.stop().await;
    }
}
