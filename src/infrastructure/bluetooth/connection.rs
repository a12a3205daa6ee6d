//! BLE Connection Module
//!
//! Owns the link state: discovery, connection with bounded retries and
//! teardown. Only one controller can be linked at a time.

use crate::domain::models::{
    DiscoveredDevice, LinkState, MessageSeverity, SessionEvent, StatusMessage,
};
use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::error::LinkError;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use crate::infrastructure::bluetooth::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connect attempts before giving up
    pub max_attempts: u32,
    /// Delay between connect attempts
    pub retry_delay: Duration,
    /// How often to re-check radio readiness before scanning
    pub readiness_poll_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_millis(1000),
            readiness_poll_interval: Duration::from_millis(500),
        }
    }
}

impl From<&LinkSettings> for ConnectionConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            max_attempts: settings.max_connect_attempts.max(1),
            retry_delay: Duration::from_millis(settings.connect_retry_delay_ms),
            readiness_poll_interval: Duration::from_millis(settings.readiness_poll_ms),
        }
    }
}

/// Marks a connect as in flight. If the connect future is dropped before it
/// settles, the attempt counter and the `Connecting` state are rolled back.
struct InFlight<'a> {
    machine: &'a LinkStateMachine,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.machine.attempts.store(0, Ordering::SeqCst);
            if matches!(self.machine.state(), LinkState::Connecting { .. }) {
                warn!("Connect abandoned before it finished");
                self.machine.set_state(LinkState::Idle);
            }
        }
        self.machine.connecting.store(false, Ordering::SeqCst);
    }
}

pub struct LinkStateMachine {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    scanner: BleScanner,
    state: watch::Sender<LinkState>,
    attempts: AtomicU32,
    connecting: AtomicBool,
    event_sender: broadcast::Sender<SessionEvent>,
}

impl LinkStateMachine {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let scanner = BleScanner::new(
            Arc::clone(&transport),
            event_sender.clone(),
            config.readiness_poll_interval,
        );
        let (state, _) = watch::channel(LinkState::Idle);
        Self {
            transport,
            config,
            scanner,
            state,
            attempts: AtomicU32::new(0),
            connecting: AtomicBool::new(false),
            event_sender,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Attempts made by the connect currently in flight, 0 when idle
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.scanner.devices()
    }

    fn set_state(&self, state: LinkState) {
        info!("Link state: {}", state);
        self.state.send_replace(state.clone());
        let _ = self
            .event_sender
            .send(SessionEvent::LinkStateChanged(state));
    }

    /// Wait for the radio, then start scanning.
    ///
    /// The readiness wait is unbounded; cancel `cancel` to abandon it.
    pub async fn begin_discovery(&self, cancel: &CancellationToken) -> Result<(), LinkError> {
        self.ensure_can_scan()?;
        self.scanner.wait_until_ready(cancel).await?;
        // The radio wait can be long; re-check before touching the scan
        self.ensure_can_scan()?;

        let previous = self.state();
        self.set_state(LinkState::Scanning);
        if let Err(e) = self.scanner.start().await {
            warn!("Could not start scanning: {}", e);
            self.set_state(previous);
            return Err(e);
        }
        Ok(())
    }

    fn ensure_can_scan(&self) -> Result<(), LinkError> {
        if self.connecting.load(Ordering::SeqCst) {
            return Err(LinkError::ConnectInProgress);
        }
        if let LinkState::Linked { device_id } = self.state() {
            return Err(LinkError::AlreadyLinked { device_id });
        }
        Ok(())
    }

    /// Connect to `device_id`, retrying up to `max_attempts` times.
    ///
    /// Connecting while already linked is rejected; call [`Self::disconnect`] first.
    pub async fn connect(&self, device_id: &str) -> Result<(), LinkError> {
        if let LinkState::Linked { device_id: current } = self.state() {
            return Err(LinkError::AlreadyLinked { device_id: current });
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(LinkError::ConnectInProgress);
        }
        let mut in_flight = InFlight {
            machine: self,
            settled: false,
        };

        if let Err(e) = self.scanner.stop().await {
            warn!("Could not stop scanning before connect: {}", e);
        }

        info!("Connecting to controller {}", device_id);
        self.send_log(
            &format!("Connecting to {device_id}..."),
            MessageSeverity::Info,
        );

        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_state(LinkState::Connecting { attempt });

            match self.connect_once(device_id, attempt).await {
                Ok(()) => {
                    in_flight.settled = true;
                    self.attempts.store(0, Ordering::SeqCst);
                    self.scanner.freeze();
                    self.set_state(LinkState::Linked {
                        device_id: device_id.to_string(),
                    });
                    self.send_log("Controller linked", MessageSeverity::Success);
                    return Ok(());
                }
                Err(e) => {
                    warn!("{}", e);
                    let _ = self.event_sender.send(SessionEvent::ConnectAttemptFailed {
                        attempt,
                        reason: e.to_string(),
                    });

                    if attempt >= self.config.max_attempts {
                        error!(
                            "Failed to connect to {} after {} attempts",
                            device_id, attempt
                        );
                        in_flight.settled = true;
                        self.attempts.store(0, Ordering::SeqCst);
                        self.set_state(LinkState::Failed);
                        self.send_log("Could not connect to controller", MessageSeverity::Error);
                        return Err(LinkError::RetriesExhausted { attempts: attempt });
                    }

                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn connect_once(&self, device_id: &str, attempt: u32) -> Result<(), LinkError> {
        let wrap = |source| LinkError::ConnectFailed { attempt, source };

        self.transport.connect(device_id).await.map_err(wrap)?;
        // The link is unusable until services and characteristics are resolved
        self.transport
            .discover_services(device_id)
            .await
            .map_err(wrap)?;
        info!("Discovered services on {}", device_id);
        Ok(())
    }

    /// Drop the current link and return to `Idle`
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let LinkState::Linked { device_id } = self.state() else {
            return Err(LinkError::NotLinked);
        };

        let result = self.transport.disconnect(&device_id).await;
        self.set_state(LinkState::Idle);
        self.send_log("Disconnected from controller", MessageSeverity::Info);
        result.map_err(LinkError::from)
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(SessionEvent::Log(StatusMessage::new(message, severity)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::simulator::SimulatedController;

    fn machine(
        controller: &Arc<SimulatedController>,
    ) -> (LinkStateMachine, broadcast::Receiver<SessionEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        let transport: Arc<dyn Transport> = controller.clone();
        (
            LinkStateMachine::new(transport, ConnectionConfig::default(), sender),
            receiver,
        )
    }

    fn drain_states(receiver: &mut broadcast::Receiver<SessionEvent>) -> Vec<LinkState> {
        let mut states = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            if let SessionEvent::LinkStateChanged(state) = event {
                states.push(state);
            }
        }
        states
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        controller.fail_next_connects(11);
        let (link, mut events) = machine(&controller);

        let result = link.connect("AA").await;
        assert_eq!(result, Err(LinkError::RetriesExhausted { attempts: 10 }));
        assert_eq!(controller.connect_calls(), 10);
        assert_eq!(link.state(), LinkState::Failed);
        assert_eq!(link.attempts(), 0);

        let states = drain_states(&mut events);
        assert_eq!(
            states.iter().filter(|s| **s == LinkState::Failed).count(),
            1
        );
        assert_eq!(states.last(), Some(&LinkState::Failed));
        assert_eq!(
            states.iter().rev().nth(1),
            Some(&LinkState::Connecting { attempt: 10 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_restarts_after_failure() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        controller.fail_next_connects(11);
        let (link, mut events) = machine(&controller);

        assert!(link.connect("AA").await.is_err());
        drain_states(&mut events);

        // The 11th scripted failure is consumed by the first attempt of a new connect
        link.connect("AA").await.unwrap();
        let states = drain_states(&mut events);
        assert_eq!(
            states,
            vec![
                LinkState::Connecting { attempt: 1 },
                LinkState::Connecting { attempt: 2 },
                LinkState::Linked {
                    device_id: "AA".to_string()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        controller.fail_next_connects(2);
        let (link, _events) = machine(&controller);

        let start = tokio::time::Instant::now();
        link.connect("AA").await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(3));
        assert_eq!(link.attempts(), 0);
    }

    #[tokio::test]
    async fn test_connect_while_linked_is_rejected() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        let (link, _events) = machine(&controller);

        link.connect("AA").await.unwrap();
        assert_eq!(
            link.connect("AA").await,
            Err(LinkError::AlreadyLinked {
                device_id: "AA".to_string()
            })
        );
        assert_eq!(controller.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_discovery_then_connect_freezes_devices() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        let (link, _events) = machine(&controller);

        link.begin_discovery(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(link.state(), LinkState::Scanning);
        assert_eq!(link.devices().len(), 1);

        link.connect("AA").await.unwrap();
        assert!(!controller.is_scanning());
        assert_eq!(link.devices().len(), 1);
        assert_eq!(link.state().linked_device(), Some("AA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connect_resets_attempts() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        controller.fail_next_connects(100);
        let (link, _events) = machine(&controller);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(2500), link.connect("AA")).await;
        assert!(abandoned.is_err());
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.attempts(), 0);

        let calls_before = controller.connect_calls();
        assert_eq!(
            link.connect("AA").await,
            Err(LinkError::RetriesExhausted { attempts: 10 })
        );
        assert_eq!(controller.connect_calls() - calls_before, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_rejected_while_connecting() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        controller.fail_next_connects(2);
        let (link, _events) = machine(&controller);

        let (connected, discovery) = tokio::join!(link.connect("AA"), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            link.begin_discovery(&CancellationToken::new()).await
        });

        assert_eq!(discovery, Err(LinkError::ConnectInProgress));
        connected.unwrap();
        assert_eq!(link.state().linked_device(), Some("AA"));
        assert!(!controller.is_scanning());
    }

    #[tokio::test]
    async fn test_scanning_state_precedes_device_events() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        let (link, mut events) = machine(&controller);

        link.begin_discovery(&CancellationToken::new())
            .await
            .unwrap();

        let mut scanning_at = None;
        let mut found_at = None;
        let mut index = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::LinkStateChanged(LinkState::Scanning) => {
                    scanning_at.get_or_insert(index);
                }
                SessionEvent::DeviceFound(_) => {
                    found_at.get_or_insert(index);
                }
                _ => {}
            }
            index += 1;
        }
        assert!(scanning_at.unwrap() < found_at.unwrap());
    }

    #[tokio::test]
    async fn test_failed_scan_restores_state() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        controller.fail_scan(true);
        let (link, _events) = machine(&controller);

        let result = link.begin_discovery(&CancellationToken::new()).await;
        assert!(matches!(result, Err(LinkError::Transport(_))));
        assert_eq!(link.state(), LinkState::Idle);
        assert!(link.devices().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_returns_to_idle() {
        let controller = Arc::new(SimulatedController::new().with_device("AA", "TSDZ2"));
        let (link, _events) = machine(&controller);

        assert_eq!(link.disconnect().await, Err(LinkError::NotLinked));

        link.connect("AA").await.unwrap();
        link.disconnect().await.unwrap();
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(controller.connected_device(), None);
    }
}
