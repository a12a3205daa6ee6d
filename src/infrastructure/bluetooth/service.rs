//! Link Session
//!
//! The one object the application talks to. It coordinates the link state
//! machine, the telemetry poller and the frame codec, and owns the cached
//! configuration and telemetry. Every mutation of those two snapshots goes
//! through here.

use crate::domain::configuration::Configuration;
use crate::domain::models::{DiscoveredDevice, LinkState, MessageSeverity, SessionEvent, StatusMessage};
use crate::domain::settings::LinkSettings;
use crate::domain::telemetry::{TelemetryControl, TelemetryReport};
use crate::infrastructure::bluetooth::{
    connection::{ConnectionConfig, LinkStateMachine},
    error::{LinkError, SessionError},
    poller::{PollTarget, PollerConfig, TelemetryPoller},
    protocol::{self, GattProfile, GattTarget},
    transport::Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Everything the session needs to know up front
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile: GattProfile,
    pub connection: ConnectionConfig,
    pub poller: PollerConfig,
    /// How often [`SnapshotObserver`] hands out snapshots
    pub observe_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: GattProfile::default(),
            connection: ConnectionConfig::default(),
            poller: PollerConfig::default(),
            observe_interval: Duration::from_millis(200),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &LinkSettings) -> Result<Self, SessionError> {
        Ok(Self {
            profile: GattProfile::from_settings(settings)?,
            connection: ConnectionConfig::from(settings),
            poller: PollerConfig::from(settings),
            observe_interval: Duration::from_millis(settings.observe_interval_ms.max(1)),
        })
    }
}

/// Point-in-time view of the session for the UI
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: LinkState,
    pub devices: Vec<DiscoveredDevice>,
    pub telemetry: TelemetryReport,
    pub configuration: Configuration,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    link: LinkStateMachine,
    config: SessionConfig,
    configuration: watch::Sender<Configuration>,
    telemetry: Arc<watch::Sender<TelemetryReport>>,
    poller: Mutex<Option<TelemetryPoller>>,
    event_sender: broadcast::Sender<SessionEvent>,
}

/// Cheap to clone handle to the single controller session
#[derive(Clone)]
pub struct LinkSession {
    inner: Arc<SessionInner>,
}

impl LinkSession {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CAPACITY);
        let link = LinkStateMachine::new(
            Arc::clone(&transport),
            config.connection.clone(),
            event_sender.clone(),
        );
        let (configuration, _) = watch::channel(Configuration::default());
        let (telemetry, _) = watch::channel(TelemetryReport::default());

        Self {
            inner: Arc::new(SessionInner {
                transport,
                link,
                config,
                configuration,
                telemetry: Arc::new(telemetry),
                poller: Mutex::new(None),
                event_sender,
            }),
        }
    }

    pub fn status(&self) -> LinkState {
        self.inner.link.state()
    }

    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.inner.link.devices()
    }

    /// Last successfully decoded telemetry
    pub fn telemetry(&self) -> TelemetryReport {
        self.inner.telemetry.borrow().clone()
    }

    /// Cached configuration: firmware defaults until the first read
    pub fn configuration(&self) -> Configuration {
        self.inner.configuration.borrow().clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            devices: self.devices(),
            telemetry: self.telemetry(),
            configuration: self.configuration(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_sender.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkState> {
        self.inner.link.watch_state()
    }

    pub fn watch_telemetry(&self) -> watch::Receiver<TelemetryReport> {
        self.inner.telemetry.subscribe()
    }

    /// Snapshots paced at the configured observe interval, independent of
    /// how often the device itself is polled
    pub fn observe(&self) -> SnapshotObserver {
        let mut ticker = tokio::time::interval(self.inner.config.observe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        SnapshotObserver {
            session: self.clone(),
            ticker,
        }
    }

    /// Wait for the radio and start scanning. Cancel `cancel` to give up waiting.
    pub async fn begin_discovery(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        self.inner.link.begin_discovery(cancel).await?;
        Ok(())
    }

    /// Link to `device_id` and start polling its telemetry
    pub async fn link(&self, device_id: &str) -> Result<(), SessionError> {
        self.inner.link.connect(device_id).await?;

        let target = PollTarget {
            transport: Arc::clone(&self.inner.transport),
            device_id: device_id.to_string(),
            characteristic: self.inner.config.profile.periodic_target(),
        };
        let poller = TelemetryPoller::spawn(
            target,
            self.inner.config.poller.clone(),
            Arc::clone(&self.inner.telemetry),
            self.inner.event_sender.clone(),
        );

        // A fresh link always gets a fresh poller
        let previous = self.inner.poller.lock().await.replace(poller);
        if let Some(previous) = previous {
            previous.stop().await;
        }
        Ok(())
    }

    /// Stop polling and drop the link
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.stop_polling().await;
        self.inner.link.disconnect().await?;
        Ok(())
    }

    /// Tear down background work; the link itself is left to the transport
    pub async fn shutdown(&self) {
        self.stop_polling().await;
    }

    async fn stop_polling(&self) {
        let poller = self.inner.poller.lock().await.take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
    }

    fn linked_device(&self) -> Result<String, LinkError> {
        self.status()
            .linked_device()
            .map(str::to_string)
            .ok_or(LinkError::NotLinked)
    }

    /// Apply `edit` to the cached configuration and write the whole frame to
    /// the controller.
    ///
    /// The edit is kept locally even if the write fails. There is no queue:
    /// concurrent edits each write their own full frame.
    pub async fn set_configuration_field<F>(&self, edit: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut Configuration),
    {
        self.inner.configuration.send_modify(edit);
        let frame = protocol::encode_configuration(&self.inner.configuration.borrow());

        let result = self
            .write(self.inner.config.profile.configuration_target(), &frame, "configuration write")
            .await;
        if let Err(e) = &result {
            error!("Configuration write failed: {}", e);
            let _ = self
                .inner
                .event_sender
                .send(SessionEvent::ConfigurationWriteFailed(e.to_string()));
        }
        result
    }

    /// Read the configuration from the controller and replace the cache.
    ///
    /// On any failure the cache is left untouched.
    pub async fn refresh_configuration(&self) -> Result<Configuration, SessionError> {
        let device_id = self.linked_device()?;
        let io_timeout = self.inner.config.poller.io_timeout;
        let read = self
            .inner
            .transport
            .read_characteristic(&device_id, self.inner.config.profile.configuration_target());
        let bytes = tokio::time::timeout(io_timeout, read)
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "configuration read",
                after: io_timeout,
            })??;

        match protocol::decode_configuration(&bytes) {
            Ok(configuration) => {
                info!("Configuration read from {}", device_id);
                self.inner.configuration.send_replace(configuration.clone());
                let _ = self.inner.event_sender.send(SessionEvent::ConfigurationRead);
                Ok(configuration)
            }
            Err(e) => {
                warn!("Ignoring configuration frame: {}", e);
                self.send_log(&format!("Bad configuration frame: {e}"), MessageSeverity::Warning);
                Err(e.into())
            }
        }
    }

    /// Send new assist level / motor state targets on the periodic characteristic
    pub async fn write_control(&self, control: TelemetryControl) -> Result<(), SessionError> {
        let frame = protocol::encode_telemetry_control(&control);
        let result = self
            .write(self.inner.config.profile.periodic_target(), &frame, "control write")
            .await;
        if let Err(e) = &result {
            error!("Control write failed: {}", e);
            self.send_log(&format!("Control write failed: {e}"), MessageSeverity::Error);
        }
        result
    }

    async fn write(
        &self,
        target: GattTarget,
        frame: &[u8],
        operation: &'static str,
    ) -> Result<(), SessionError> {
        let device_id = self.linked_device()?;
        let io_timeout = self.inner.config.poller.io_timeout;
        let write = self
            .inner
            .transport
            .write_characteristic(&device_id, target, frame);
        tokio::time::timeout(io_timeout, write)
            .await
            .map_err(|_| SessionError::Timeout {
                operation,
                after: io_timeout,
            })??;
        Ok(())
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .inner
            .event_sender
            .send(SessionEvent::Log(StatusMessage::new(message, severity)));
    }
}

/// Paces UI reads of the session's cached state
pub struct SnapshotObserver {
    session: LinkSession,
    ticker: Interval,
}

impl SnapshotObserver {
    /// Wait for the next observe tick and return the current snapshot
    pub async fn next(&mut self) -> SessionSnapshot {
        self.ticker.tick().await;
        self.session.snapshot()
    }
}
