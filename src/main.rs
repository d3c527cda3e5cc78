use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use robocar_link_lib::core::bluetooth::{AllowAll, RadioAdapter};
use robocar_link_lib::state::AppState;
use robocar_link_lib::{AppConfig, ChannelEventSink, DeviceIdentity, LinkConfig, LinkEvent, logging};

#[derive(Parser)]
#[command(name = "robocar-link", version, about = "Drive a serial robot car over Bluetooth RFCOMM")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Writes the default config file
    InitConfig,
    #[command(flatten)]
    Link(LinkCommand),
}

/// Commands that need the radio.
#[derive(Subcommand)]
enum LinkCommand {
    /// Lists paired devices
    Bonded,
    /// Runs a live inquiry and prints the candidates
    Scan,
    /// Connects, then sends each line read from stdin as a command (`quit` ends)
    Connect { address: String },
    /// Prints bond state and type of a device
    Describe { address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::parse_level(cli.log_level.as_deref().unwrap_or("info")));

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load(&config_path).await?;
    if cli.log_level.is_none() {
        logging::set_level(logging::parse_level(&config.log_level));
    }

    match cli.command {
        Command::InitConfig => {
            AppConfig::default().save(&config_path).await?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
        Command::Link(command) => run(command, config).await,
    }
}

async fn run(command: LinkCommand, config: AppConfig) -> Result<()> {
    let radio = open_radio(&config.link).await?;
    let (sink, mut events) = ChannelEventSink::new();
    let state = AppState::start(config, radio, Arc::new(AllowAll), Arc::new(sink));
    let manager = state.get_link_manager_arc();

    if !manager.is_radio_enabled().await {
        bail!("Bluetooth adapter is powered off");
    }

    match command {
        LinkCommand::Bonded => {
            for device in manager.list_bonded_devices().await {
                println!("{device}");
            }
        }
        LinkCommand::Scan => {
            manager.list_bonded_devices().await;
            if manager.start_scan().await {
                while let Some(event) = events.recv().await {
                    print_event(&event);
                    if event == LinkEvent::ScanFinished {
                        break;
                    }
                }
            }
            for candidate in manager.candidates() {
                let marker = if candidate.bonded { "paired" } else { "new" };
                println!("{} [{}]", candidate.device, marker);
            }
        }
        LinkCommand::Describe { address } => {
            let device = resolve(&state, &address).await;
            println!("{}", manager.describe_device(&device).await);
        }
        LinkCommand::Connect { address } => {
            let device = resolve(&state, &address).await;
            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    print_event(&event);
                }
            });

            if manager.connect(device).await?.is_ok() {
                if let Some(device) = manager.connected_device().await {
                    info!("Connected to {}", device);
                }
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Some(line) = lines.next_line().await? {
                    let command = line.trim();
                    if command.eq_ignore_ascii_case("quit") {
                        break;
                    }
                    if !command.is_empty() {
                        manager.send(command);
                    }
                }
            }

            state.stop().await;
            printer.abort();
            return Ok(());
        }
    }

    state.stop().await;
    Ok(())
}

/// Fills in the device name from the paired list when possible.
async fn resolve(state: &AppState, address: &str) -> DeviceIdentity {
    let wanted = DeviceIdentity::new(address, None);
    state
        .link_manager
        .list_bonded_devices()
        .await
        .into_iter()
        .find(|device| *device == wanted)
        .unwrap_or(wanted)
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::DeviceFound(device) => println!("found: {device}"),
        LinkEvent::ScanFinished => println!("scan finished"),
        LinkEvent::ConnectionStateChanged(true) => println!("connected"),
        LinkEvent::ConnectionStateChanged(false) => println!("disconnected"),
        LinkEvent::DataSent(command) => println!("sent: {command}"),
        LinkEvent::Error(message) => eprintln!("error: {message}"),
    }
}

#[cfg(all(feature = "bluez", target_os = "linux"))]
async fn open_radio(config: &LinkConfig) -> Result<Arc<dyn RadioAdapter>> {
    let radio = robocar_link_lib::core::bluetooth::BluezRadio::new(config.adapter_name.as_deref()).await?;
    Ok(Arc::new(radio))
}

#[cfg(not(all(feature = "bluez", target_os = "linux")))]
async fn open_radio(_config: &LinkConfig) -> Result<Arc<dyn RadioAdapter>> {
    bail!("built without a radio backend; rebuild with `--features bluez` on Linux")
}
