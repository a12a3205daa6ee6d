//! Wireless transport contract
//!
//! Platform BLE stacks (Android/iOS bridges, desktop GATT clients) live outside
//! this crate and plug in by implementing [`Transport`].

use crate::domain::models::DiscoveredDevice;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::protocol::GattTarget;
use async_trait::async_trait;
use std::sync::Arc;

/// Invoked once per advertisement the radio reports while scanning
pub type DiscoveryCallback = Arc<dyn Fn(DiscoveredDevice) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the radio is powered and usable
    async fn check_ready(&self) -> bool;

    /// Start delivering advertisements to `on_device` until [`Transport::stop_scan`]
    async fn start_scan(&self, on_device: DiscoveryCallback) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, device_id: &str) -> Result<(), TransportError>;

    /// Resolve services and characteristics; required before any read or write
    async fn discover_services(&self, device_id: &str) -> Result<(), TransportError>;

    async fn disconnect(&self, device_id: &str) -> Result<(), TransportError>;

    async fn read_characteristic(
        &self,
        device_id: &str,
        target: GattTarget,
    ) -> Result<Vec<u8>, TransportError>;

    async fn write_characteristic(
        &self,
        device_id: &str,
        target: GattTarget,
        value: &[u8],
    ) -> Result<(), TransportError>;
}
