use clap::Parser;
use sensor_probe::scanner::{self, Backend};
use sensor_probe::sink::bridge::MqttBridge;
use sensor_probe::sink::database::PgStore;
use sensor_probe::{ConfigError, Probe, ProbeError, Registry, ScanError, config};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Path to the configuration file.
    #[arg(long, default_value = "sensor-probe.toml")]
    config: PathBuf,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    backend: Backend,

    /// Verbose output; equivalent to RUST_LOG=debug when RUST_LOG is unset
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Wire everything up and run the dispatch loop until interrupted.
async fn run(options: Options) -> Result<(), RunError> {
    let config = config::load(&options.config)?;

    let registry = Registry::new(&config.sensors, &config.intervals);
    for sensor in registry.sensors() {
        info!(
            id = sensor.id,
            name = %sensor.name,
            address = %sensor.address,
            family = %sensor.family,
            table = %sensor.table,
            "adding sensor"
        );
    }

    let bridge = MqttBridge::connect(&config.bridge);
    let store = PgStore::new(&config.database.url);

    let filter = registry.addresses();
    let (reports, scan) = scanner::start_scan(options.backend, filter).await?;
    info!(backend = %options.backend, "scanning");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut probe = Probe::new(registry);
    probe
        .run(reports, scan, shutdown_rx, &bridge, &store)
        .await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    let default_filter = if options.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
