//! Simulated TSDZ controller
//!
//! An in-process [`Transport`] that behaves like a powered controller: it
//! advertises, accepts connections, stores the configuration frame it is
//! given and serves periodic frames. Faults can be scripted for tests.

use crate::domain::configuration::Configuration;
use crate::domain::models::DiscoveredDevice;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{
    self, telemetry_offset, GattProfile, GattTarget, CONFIGURATION_FRAME_SIZE,
    TELEMETRY_FRAME_SIZE,
};
use crate::infrastructure::bluetooth::transport::{DiscoveryCallback, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct ControllerState {
    not_ready_checks: u32,
    advertisements: Vec<DiscoveredDevice>,
    scanning: bool,
    fail_scan: bool,
    connect_failures: u32,
    connect_calls: u32,
    connected: Option<String>,
    configuration: Vec<u8>,
    periodic: Vec<u8>,
    queued_periodic: VecDeque<Vec<u8>>,
    periodic_reads: u32,
    hang_reads: bool,
    fail_writes: bool,
    writes: Vec<(Uuid, Vec<u8>)>,
}

pub struct SimulatedController {
    profile: GattProfile,
    state: Mutex<ControllerState>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// A powered controller with firmware default configuration and an idle motor
    pub fn new() -> Self {
        Self {
            profile: GattProfile::default(),
            state: Mutex::new(ControllerState {
                not_ready_checks: 0,
                advertisements: Vec::new(),
                scanning: false,
                fail_scan: false,
                connect_failures: 0,
                connect_calls: 0,
                connected: None,
                configuration: protocol::encode_configuration(&Configuration::default()).to_vec(),
                periodic: vec![0; TELEMETRY_FRAME_SIZE],
                queued_periodic: VecDeque::new(),
                periodic_reads: 0,
                hang_reads: false,
                fail_writes: false,
                writes: Vec::new(),
            }),
        }
    }

    /// A controller advertising as a TSDZ2 with a riding-like telemetry frame
    pub fn demo() -> Self {
        let controller = Self::new().with_device("C4:4F:33:12:7A:01", "TSDZ2");
        let mut frame = vec![0u8; TELEMETRY_FRAME_SIZE];
        frame[0..2].copy_from_slice(&482u16.to_le_bytes());
        frame[2] = 45;
        frame[3..5].copy_from_slice(&226u16.to_le_bytes());
        frame[9] = 38;
        frame[15] = 78;
        frame[24] = 2;
        frame[25..27].copy_from_slice(&140u16.to_le_bytes());
        frame[27] = 87;
        frame[32] = 1;
        frame[33..35].copy_from_slice(&310u16.to_le_bytes());
        frame[35..37].copy_from_slice(&210u16.to_le_bytes());
        controller.set_periodic_frame(frame);
        controller
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_device(self, id: &str, name: &str) -> Self {
        self.lock()
            .advertisements
            .push(DiscoveredDevice::new(id, name));
        self
    }

    /// Advertise a device without a name
    pub fn with_anonymous_device(self, id: &str) -> Self {
        self.lock().advertisements.push(DiscoveredDevice {
            id: id.to_string(),
            name: None,
        });
        self
    }

    /// Report "not ready" for the next `checks` readiness probes
    pub fn not_ready_for(&self, checks: u32) {
        self.lock().not_ready_checks = checks;
    }

    /// Make scan requests fail
    pub fn fail_scan(&self, fail: bool) {
        self.lock().fail_scan = fail;
    }

    /// Fail the next `count` connect calls
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().connect_failures = count;
    }

    pub fn set_periodic_frame(&self, frame: Vec<u8>) {
        self.lock().periodic = frame;
    }

    /// Serve `frame` once on the next periodic read, ahead of the steady frame
    pub fn queue_periodic_frame(&self, frame: Vec<u8>) {
        self.lock().queued_periodic.push_back(frame);
    }

    pub fn set_configuration_frame(&self, frame: Vec<u8>) {
        self.lock().configuration = frame;
    }

    /// Make reads never complete
    pub fn hang_reads(&self, hang: bool) {
        self.lock().hang_reads = hang;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn periodic_reads(&self) -> u32 {
        self.lock().periodic_reads
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn connected_device(&self) -> Option<String> {
        self.lock().connected.clone()
    }

    /// Every value written to `characteristic`, oldest first
    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn ensure_connected(&self, device_id: &str) -> Result<(), TransportError> {
        match self.lock().connected.as_deref() {
            Some(id) if id == device_id => Ok(()),
            _ => Err(TransportError::new(format!("{device_id} is not connected"))),
        }
    }

    fn ensure_service(&self, target: GattTarget) -> Result<(), TransportError> {
        if target.service == self.profile.service {
            Ok(())
        } else {
            Err(TransportError::new(format!(
                "unknown service {}",
                target.service
            )))
        }
    }
}

#[async_trait]
impl Transport for SimulatedController {
    async fn check_ready(&self) -> bool {
        let mut state = self.lock();
        if state.not_ready_checks > 0 {
            state.not_ready_checks -= 1;
            false
        } else {
            true
        }
    }

    async fn start_scan(&self, on_device: DiscoveryCallback) -> Result<(), TransportError> {
        let advertisements = {
            let mut state = self.lock();
            if state.fail_scan {
                return Err(TransportError::new("scan rejected (simulated)"));
            }
            state.scanning = true;
            state.advertisements.clone()
        };
        for device in advertisements {
            on_device(device);
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.lock().scanning = false;
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::new("connection refused (simulated)"));
        }
        if !state.advertisements.iter().any(|d| d.id == device_id) {
            return Err(TransportError::new(format!("{device_id} not in range")));
        }
        state.connected = Some(device_id.to_string());
        debug!("Simulated controller connected to {}", device_id);
        Ok(())
    }

    async fn discover_services(&self, device_id: &str) -> Result<(), TransportError> {
        self.ensure_connected(device_id)
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError> {
        self.ensure_connected(device_id)?;
        self.lock().connected = None;
        Ok(())
    }

    async fn read_characteristic(
        &self,
        device_id: &str,
        target: GattTarget,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected(device_id)?;
        self.ensure_service(target)?;

        let hang = self.lock().hang_reads;
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if target.characteristic == self.profile.periodic {
            state.periodic_reads += 1;
            let frame = match state.queued_periodic.pop_front() {
                Some(frame) => frame,
                None => state.periodic.clone(),
            };
            Ok(frame)
        } else if target.characteristic == self.profile.configuration {
            Ok(state.configuration.clone())
        } else {
            Err(TransportError::new(format!(
                "unknown characteristic {}",
                target.characteristic
            )))
        }
    }

    async fn write_characteristic(
        &self,
        device_id: &str,
        target: GattTarget,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.ensure_connected(device_id)?;
        self.ensure_service(target)?;

        let mut state = self.lock();
        if state.fail_writes {
            return Err(TransportError::new("write not permitted (simulated)"));
        }
        state.writes.push((target.characteristic, value.to_vec()));

        if target.characteristic == self.profile.configuration {
            if value.len() == CONFIGURATION_FRAME_SIZE {
                state.configuration = value.to_vec();
            }
        } else if target.characteristic == self.profile.periodic {
            // The controller applies the targets and reports them back
            if let [assist, motor, ..] = value {
                if let Some(level) = state.periodic.get_mut(telemetry_offset::ASSIST_LEVEL) {
                    *level = *assist;
                }
                if let Some(motor_state) = state.periodic.get_mut(telemetry_offset::MOTOR_STATE) {
                    *motor_state = *motor;
                }
            }
        }
        Ok(())
    }
}
