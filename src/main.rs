//! Demo front end: links to the simulated controller and prints telemetry
//! until Ctrl+C.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tsdz_link::domain::models::SessionEvent;
use tsdz_link::domain::settings::SettingsService;
use tsdz_link::domain::telemetry::{AssistLevel, TelemetryControl};
use tsdz_link::infrastructure::bluetooth::service::{SessionConfig, SessionSnapshot};
use tsdz_link::infrastructure::bluetooth::simulator::SimulatedController;
use tsdz_link::infrastructure::logging;
use tsdz_link::LinkSession;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = SettingsService::new()?;
    let _guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting TSDZ link");

    let config = SessionConfig::from_settings(&settings.get().link)?;
    let session = LinkSession::new(Arc::new(SimulatedController::demo()), config);
    spawn_event_logger(&session);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    session.begin_discovery(&cancel).await?;
    let devices = session.devices();
    let remembered = settings.get().link.last_connected_device.clone();
    let device_id = remembered
        .filter(|id| devices.iter().any(|d| &d.id == id))
        .or_else(|| devices.first().map(|d| d.id.clone()))
        .ok_or_else(|| anyhow::anyhow!("No TSDZ controller found"))?;

    session.link(&device_id).await?;
    if let Err(e) = settings.remember_device(&device_id) {
        warn!("Could not save last connected device: {}", e);
    }

    let configuration = session.refresh_configuration().await?;
    info!(
        "Wheel perimeter {} mm, max speed {} km/h, {} assist levels",
        configuration.wheel_perimeter,
        configuration.wheel_max_speed,
        configuration.number_of_assist_levels
    );
    session
        .write_control(TelemetryControl::new(AssistLevel::Percent45, true))
        .await?;

    let mut observer = session.observe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            snapshot = observer.next() => print_snapshot(&snapshot),
        }
    }

    session.disconnect().await?;
    info!("Stopped");
    Ok(())
}

fn spawn_event_logger(session: &LinkSession) {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Log(message) => info!("[{:?}] {}", message.severity, message.message),
                SessionEvent::TelemetryDecodeFailed(e) => warn!("Telemetry dropped: {}", e),
                SessionEvent::ConfigurationWriteFailed(e) => warn!("Configuration not saved: {}", e),
                _ => {}
            }
        }
    });
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    let t = &snapshot.telemetry;
    let assist = t.assist().map(AssistLevel::label).unwrap_or("?");
    println!(
        "{} | {:5.1} V {:5.1} A | {:4.1} km/h | {:3} rpm | assist {} | {:?}",
        snapshot.status,
        t.battery_voltage,
        t.battery_current,
        t.wheel_speed,
        t.pedal_cadence,
        assist,
        t.error()
    );
}
