//! # Serial Communication Module
//!
//! Handles the serial link to the GPS receiver.
//!
//! This module handles:
//! - Opening the receiver port with its fixed line discipline (9600 8N1,
//!   hardware flow control by default)
//! - Async reads driven by descriptor readiness
//! - Reassembling the byte stream into sentences

pub mod port_trait;
pub mod reassembler;

pub use port_trait::{SerialPortIO, TokioSerialPort};
pub use reassembler::LineReader;

use crate::config::SerialConfig;
use crate::error::{CourierError, Result};
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// Baud rate of the NMEA receiver (NMEA 0183 standard)
pub const NMEA_BAUD_RATE: u32 = 9600;

/// Default receiver device path (Raspberry Pi primary UART)
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyAMA0";

/// GPS receiver serial port handler
pub struct GpsSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyAMA0)
    device_path: String,
}

impl std::fmt::Debug for GpsSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpsSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl GpsSerial {
    /// Open the receiver port described by `config`
    ///
    /// Must be called from within a tokio runtime, the port registers with
    /// the reactor for readiness notification.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the device cannot be opened or configured
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nmea_courier::config::SerialConfig;
    /// use nmea_courier::serial::GpsSerial;
    ///
    /// #[tokio::main(flavor = "current_thread")]
    /// async fn main() -> anyhow::Result<()> {
    ///     let serial = GpsSerial::open(&SerialConfig::default())?;
    ///     println!("Connected to: {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let flow_control = if config.hardware_flow_control {
            tokio_serial::FlowControl::Hardware
        } else {
            tokio_serial::FlowControl::None
        };

        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|e| CourierError::Serial(format!("Failed to open {}: {}", config.port, e)))?;

        info!("Opened GPS receiver at {} ({} baud)", config.port, config.baud_rate);

        Ok(Self {
            port,
            device_path: config.port.clone(),
        })
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Hand the port over as a byte source for a [`LineReader`]
    pub fn into_port(self) -> TokioSerialPort {
        TokioSerialPort::new(self.port)
    }
}
