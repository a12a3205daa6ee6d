use serde::{Deserialize, Serialize};
use std::fmt;

/// A peripheral reported by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Platform-stable address or identifier
    pub id: String,
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Scanning,
    Connecting {
        attempt: u32,
    },
    Linked {
        device_id: String,
    },
    Failed,
}

impl LinkState {
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked { .. })
    }

    pub fn linked_device(&self) -> Option<&str> {
        match self {
            Self::Linked { device_id } => Some(device_id),
            _ => None,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Scanning => f.write_str("scanning"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Linked { device_id } => write!(f, "linked to {device_id}"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Events broadcast by the session to whoever is listening (usually the UI)
#[derive(Debug, Clone)]
pub enum SessionEvent {
    LinkStateChanged(LinkState),
    DeviceFound(DiscoveredDevice),
    ConnectAttemptFailed { attempt: u32, reason: String },
    /// A telemetry frame was dropped; the previous snapshot stays
    TelemetryDecodeFailed(String),
    ConfigurationRead,
    ConfigurationWriteFailed(String),
    Log(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
