//! # NMEA Courier
//!
//! Forward GPS receiver sentences from a serial port to a remote collection
//! service.

use anyhow::Result;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use nmea_courier::backlog;
use nmea_courier::config::{Config, LoggingConfig};
use nmea_courier::courier::{Courier, CourierSettings, TokioSleeper};
use nmea_courier::serial::{GpsSerial, LineReader};
use nmea_courier::transport::TcpTransport;

/// Environment variable naming the configuration file
const CONFIG_ENV_VAR: &str = "NMEA_COURIER_CONFIG";

/// Configuration file used when the environment variable is unset
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for NMEA Courier
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration and set up logging
///    - Open the local backlog and allocate the bundle
///
/// 2. **Startup**
///    - Probe the collection service until it answers the liveness check
///    - Open the GPS receiver serial port
///    - Start a session with the collection service
///
/// 3. **Main Loop**
///    - Read sentences, back them up locally, bundle them
///    - Push the bundle on every RMC sentence
///    - Handle Ctrl+C for shutdown, including during the liveness retries
///
/// # Errors
///
/// Returns error (nonzero exit) if:
/// - Configuration is invalid or the backlog cannot be created
/// - The liveness check answers with an unexpected payload
/// - The serial port cannot be opened or read
/// - The session handshake fails
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = load_config()?;
    let _guard = init_logging(&config.logging);

    info!("NMEA Courier v{} starting...", env!("CARGO_PKG_VERSION"));

    tokio::select! {
        result = run(config) => result?,

        // Handle Ctrl+C for graceful shutdown
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}

/// Run the pipeline until a fatal error
async fn run(config: Config) -> Result<()> {
    info!("Opening local backlog");
    let sink = backlog::open(&config.backlog)?;

    let transport = TcpTransport::from_config(&config.endpoint);
    let mut courier = Courier::new(
        transport,
        TokioSleeper,
        sink,
        CourierSettings::from_config(&config),
    );

    info!(
        "Connecting to {}:{}",
        config.endpoint.host, config.endpoint.port
    );
    courier.await_reachability().await?;

    let serial = GpsSerial::open(&config.serial)?;
    info!("GPS receiver opened at: {}", serial.device_path());

    courier.start_session().await?;

    let mut reader = LineReader::new(serial.into_port(), config.serial.max_line_length);
    courier.run(&mut reader).await?;

    Ok(())
}

/// Load configuration from `NMEA_COURIER_CONFIG` or the default path
///
/// Falls back to built-in defaults when no file is named and the default
/// path does not exist.
fn load_config() -> Result<Config> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Ok(Config::load(path)?);
    }

    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        return Ok(Config::load(DEFAULT_CONFIG_PATH)?);
    }

    Ok(Config::default())
}

/// Install the tracing subscriber, writing to stdout or a daily rolling file
fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let (writer, guard) = match &config.dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            "nmea-courier.log",
        )),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(writer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_constants() {
        assert_eq!(CONFIG_ENV_VAR, "NMEA_COURIER_CONFIG");
        assert!(DEFAULT_CONFIG_PATH.ends_with(".toml"));
    }

    #[test]
    fn test_bundled_default_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = Config::load(path).unwrap();
        assert_eq!(config.bundle.flush_tag, "$GPRMC");
    }
}
