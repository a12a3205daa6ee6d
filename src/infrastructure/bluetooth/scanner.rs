//! BLE Scanner Module
//!
//! Waits for the radio to power on, then collects advertising controllers
//! into a de-duplicated device list.

use crate::domain::models::{DiscoveredDevice, MessageSeverity, SessionEvent, StatusMessage};
use crate::infrastructure::bluetooth::error::LinkError;
use crate::infrastructure::bluetooth::transport::{DiscoveryCallback, Transport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Devices seen during the current discovery, keyed by id
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DiscoveredDevice>,
    frozen: bool,
}

impl DeviceRegistry {
    /// Record a device. Returns `true` if it was new.
    ///
    /// Nameless advertisements are ignored, and nothing is added once the
    /// registry is frozen by a successful link.
    pub fn insert(&mut self, device: DiscoveredDevice) -> bool {
        if self.frozen || !device.has_name() {
            return false;
        }
        if self.devices.iter().any(|d| d.id == device.id) {
            return false;
        }
        self.devices.push(device);
        true
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.frozen = false;
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DiscoveredDevice> {
        self.devices.clone()
    }
}

/// BLE scanner for TSDZ controllers
pub struct BleScanner {
    transport: Arc<dyn Transport>,
    registry: Arc<Mutex<DeviceRegistry>>,
    event_sender: broadcast::Sender<SessionEvent>,
    readiness_poll_interval: Duration,
}

fn lock_registry(registry: &Mutex<DeviceRegistry>) -> MutexGuard<'_, DeviceRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BleScanner {
    pub fn new(
        transport: Arc<dyn Transport>,
        event_sender: broadcast::Sender<SessionEvent>,
        readiness_poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            registry: Arc::new(Mutex::new(DeviceRegistry::default())),
            event_sender,
            readiness_poll_interval,
        }
    }

    /// Poll the transport until it reports ready.
    ///
    /// There is no upper bound on the wait; the only way out besides the radio
    /// powering on is `cancel`, which yields [`LinkError::TransportNotReady`].
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<(), LinkError> {
        let mut logged = false;
        loop {
            if cancel.is_cancelled() {
                return Err(LinkError::TransportNotReady);
            }
            if self.transport.check_ready().await {
                return Ok(());
            }
            if !logged {
                info!("Bluetooth is not powered on yet, waiting...");
                self.send_log("Waiting for Bluetooth to be turned on", MessageSeverity::Warning);
                logged = true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::TransportNotReady),
                _ = tokio::time::sleep(self.readiness_poll_interval) => {}
            }
        }
    }

    /// Clear the device list and start scanning
    pub async fn start(&self) -> Result<(), LinkError> {
        lock_registry(&self.registry).clear();

        info!("Starting BLE scan for TSDZ controllers");
        self.send_log("Scanning for controllers...", MessageSeverity::Info);

        let registry = Arc::clone(&self.registry);
        let sender = self.event_sender.clone();
        let on_device: DiscoveryCallback = Arc::new(move |device: DiscoveredDevice| {
            let added = lock_registry(&registry).insert(device.clone());
            if added {
                debug!("Discovered {} ({:?})", device.id, device.name);
                let _ = sender.send(SessionEvent::DeviceFound(device));
            }
        });

        self.transport.start_scan(on_device).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), LinkError> {
        info!("Stopping BLE scan...");
        self.transport.stop_scan().await?;
        Ok(())
    }

    /// Stop accepting new devices; the current list stays readable
    pub fn freeze(&self) {
        lock_registry(&self.registry).freeze();
    }

    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        lock_registry(&self.registry).snapshot()
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(SessionEvent::Log(StatusMessage::new(message, severity)));
    }
}
