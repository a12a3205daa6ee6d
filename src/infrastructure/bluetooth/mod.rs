//! Bluetooth Module
//!
//! BLE link to a TSDZ motor controller running the wireless firmware.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      LinkSession                         │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┬─────────────┐
//!         │             │             │             │
//!         ▼             ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │  Poller  │  │ Protocol │
//! │           │  │            │  │          │  │          │
//! │ - Radio   │  │ - Retries  │  │ - 1 Hz   │  │ - UUIDs  │
//! │   ready   │  │ - Link     │  │   reads  │  │ - Config │
//! │ - Devices │  │   state    │  │          │  │ - Telem. │
//! └─────┬─────┘  └─────┬──────┘  └────┬─────┘  └──────────┘
//!       └──────────────┼──────────────┘
//!                      ▼
//!               ┌────────────┐
//!               │ Transport  │  (BLE stack or simulator)
//!               └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers and the configuration/telemetry frame codec
//! - [`scanner`] - Radio readiness and device discovery
//! - [`connection`] - Link state machine with bounded connect retries
//! - [`poller`] - Periodic telemetry reads
//! - [`service`] - Session facade
//! - [`transport`] - The seam to the platform BLE stack
//! - [`simulator`] - In-process controller used by tests and the demo binary

pub mod connection;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod simulator;
pub mod transport;

pub use service::LinkSession;
