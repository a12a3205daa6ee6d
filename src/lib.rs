//! TSDZ Link
//!
//! Bluetooth LE link to a TSDZ mid-drive motor controller: discovery,
//! connection, live telemetry and configuration read/write.

pub mod domain;
pub mod infrastructure;

pub use infrastructure::bluetooth::LinkSession;
