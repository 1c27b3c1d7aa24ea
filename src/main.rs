use anyhow::Context;
use bedjet_controller::domain::models::{AppEvent, DeviceAddress};
use bedjet_controller::domain::modes::{FanLevel, OperatingMode, PresetMode};
use bedjet_controller::domain::settings::SettingsService;
use bedjet_controller::infrastructure::bluetooth::{DeviceSession, SessionConfig, Transport};
use bedjet_controller::infrastructure::logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How often `watch` checks the link and reconnects if needed
const UPDATE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "bedjet-ctl", version, about = "Control a BedJet V3 over Bluetooth LE")]
struct Cli {
    /// Appliance address, e.g. AA:BB:CC:DD:EE:FF (defaults to the saved one)
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Settings file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Remember --address for later runs
    #[arg(long, global = true)]
    save_address: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stay connected and print every status update as JSON
    Watch,
    /// Set the operating mode (off, cool, heat, dry)
    Mode { mode: OperatingMode },
    /// Select a preset (off, cool, heat, dry, turbo, ext_ht, m1, m2, m3)
    Preset { preset: PresetMode },
    /// Set the fan by level name (min, low, medium, high, max) or percent
    Fan { speed: String },
    /// Set the target temperature in °F
    Temp { fahrenheit: i32 },
    /// Set the run timer in minutes
    Timer { minutes: u16 },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match &cli.config {
        Some(path) => SettingsService::load_from(path.clone()),
        None => SettingsService::new()?,
    };
    let _log_guard = logging::init_logger(&settings_service.get().log_settings)?;

    if cli.save_address {
        if let Some(address) = &cli.address {
            settings_service.set_device_address(address)?;
            info!("Saved {} to {}", address, settings_service.path().display());
        }
    }

    let address = cli
        .address
        .clone()
        .or_else(|| settings_service.get().device_address.clone())
        .map(DeviceAddress::new)
        .context("No device address given and none saved in settings")?;
    let config = settings_service.get().session_config()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(run(cli.command, address, config))
}

async fn run(command: Command, address: DeviceAddress, config: SessionConfig) -> anyhow::Result<()> {
    let transport = create_transport(&config)?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let max_attempts = config.max_connect_attempts;
    let session = DeviceSession::new(address, transport, config, event_tx);

    session.connect_and_subscribe(max_attempts).await?;

    let result = match command {
        Command::Watch => watch(&session, event_rx).await,
        Command::Mode { mode } => Ok(session.set_operating_mode(mode).await?),
        Command::Preset { preset } => Ok(session.set_preset_mode(preset).await?),
        Command::Fan { speed } => match speed.parse::<FanLevel>() {
            Ok(level) => Ok(session.set_fan_level(level).await?),
            Err(_) => {
                let percent = speed
                    .parse::<u32>()
                    .with_context(|| format!("'{}' is neither a fan level nor a percentage", speed))?;
                Ok(session.set_fan_percent(percent).await?)
            }
        },
        Command::Temp { fahrenheit } => Ok(session.set_target_temperature(fahrenheit).await?),
        Command::Timer { minutes } => Ok(session.set_timer(minutes).await?),
    };

    session.disconnect().await;
    result
}

async fn watch(
    session: &DeviceSession,
    mut events: mpsc::UnboundedReceiver<AppEvent>,
) -> anyhow::Result<()> {
    let mut update = tokio::time::interval(UPDATE_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            _ = update.tick() => {
                if let Err(e) = session.update().await {
                    warn!("Update failed: {}", e);
                }
            }
            event = events.recv() => match event {
                Some(AppEvent::StatusUpdated(status)) => {
                    println!("{}", serde_json::to_string(&status)?);
                }
                Some(AppEvent::ConnectionState(state)) => info!("Connection: {:?}", state),
                Some(AppEvent::DecodeFailed { payload, reason }) => {
                    warn!("Undecodable status {:02X?}: {}", payload, reason);
                }
                None => return Ok(()),
            },
        }
    }
}

#[cfg(windows)]
fn create_transport(config: &SessionConfig) -> anyhow::Result<Arc<dyn Transport>> {
    use bedjet_controller::infrastructure::bluetooth::winrt::WinRtTransport;
    Ok(Arc::new(WinRtTransport::new(config.service_uuid)))
}

#[cfg(not(windows))]
fn create_transport(_config: &SessionConfig) -> anyhow::Result<Arc<dyn Transport>> {
    anyhow::bail!("No Bluetooth LE backend is available on this platform")
}
