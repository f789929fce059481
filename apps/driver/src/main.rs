mod driver;
mod setup_flow;

use anyhow::{Context, Result};
use avr_device_denon::DenonReceiverFactory;
use avr_integration::{DriverMetadata, IntegrationApi, IntegrationServer, MdnsAdvertisement};
use avr_persistence::Devices;
use clap::Parser;
use driver::{Driver, POLL_INTERVAL};
use setup_flow::SsdpDiscovery;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_PORT: u16 = 9090;
const DEFAULT_LOG_FILTER: &str = "info,avr=debug,intg_denonavr=debug";

/// Denon/Marantz AVR integration driver
#[derive(Parser, Debug)]
#[command(name = "intg-denonavr", version)]
struct Args {
    /// Directory holding config.json
    #[arg(long, env = "UC_CONFIG_HOME")]
    config_dir: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long, env = "UC_INTEGRATION_INTERFACE", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    interface: IpAddr,

    /// Websocket port, defaults to the port in driver.json
    #[arg(long, env = "UC_INTEGRATION_HTTP_PORT")]
    port: Option<u16>,

    /// Path of the driver metadata file
    #[arg(long, env = "UC_DRIVER_METADATA", default_value = "driver.json")]
    metadata: PathBuf,

    /// Do not publish the driver with mDNS
    #[arg(long, env = "UC_DISABLE_MDNS_PUBLISH")]
    no_mdns: bool,
}

/// `RUST_LOG`, then `UC_LOG_LEVEL`, then the built-in default.
fn log_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    std::env::var("UC_LOG_LEVEL")
        .ok()
        .filter(|level| !level.trim().is_empty())
        .and_then(|level| EnvFilter::try_new(level.to_ascii_lowercase()).ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.into())
}

fn config_dir(args: &Args) -> Result<PathBuf> {
    match &args.config_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?
            .join("intg-denonavr")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Denon AVR integration driver {}", env!("CARGO_PKG_VERSION"));

    let metadata = DriverMetadata::load(&args.metadata)?;
    let config_dir = config_dir(&args)?;
    info!("Config directory: {}", config_dir.display());

    let devices = Arc::new(Devices::open(&config_dir).await?);
    let api = IntegrationApi::new();
    let driver = Driver::new(
        api.clone(),
        devices,
        Arc::new(DenonReceiverFactory::default()),
        Arc::new(SsdpDiscovery),
    );
    driver.load_configured();
    let _poller = driver.spawn_poller(POLL_INTERVAL);

    let port = args.port.or(metadata.port).unwrap_or(DEFAULT_PORT);
    let listener = IntegrationServer::bind(SocketAddr::new(args.interface, port)).await?;

    let _advertisement = if args.no_mdns {
        None
    } else {
        match MdnsAdvertisement::publish(&metadata, port) {
            Ok(advertisement) => Some(advertisement),
            Err(e) => {
                warn!("mDNS advertisement failed: {:#}", e);
                None
            }
        }
    };

    let server = IntegrationServer::new(api, Arc::new(driver.clone()), metadata);
    tokio::select! {
        result = server.run(listener) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }

    driver.shutdown().await;
    Ok(())
}
