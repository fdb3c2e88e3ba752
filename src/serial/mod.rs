//! # Serial Communication Module
//!
//! Handles the serial ports the tracker talks over:
//!
//! - the command console: text commands in, replies, streamed logs and
//!   mirrored log lines out
//! - the fix feed: JSON fix records in, receiver control commands out
//!
//! Both are opened the same way (8N1, no flow control) and split into a read
//! half and a [`SerialPortIO`] write half.

pub mod port_trait;

pub use port_trait::{SerialPortIO, TokioSerialPort};

use crate::error::{Result, TrackerError};
use crate::event::{Event, EventSender};
use crate::logging::escape_log;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Console baud rate
pub const CONSOLE_BAUD_RATE: u32 = 921_600;

/// Serial port handle
pub struct TrackerSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for TrackerSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl TrackerSerial {
    /// Opens the first port that works from a list of device paths
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
    /// * `baud_rate` - Line speed
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if none of the paths could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_tracker::serial::{TrackerSerial, CONSOLE_BAUD_RATE};
    ///
    /// let serial = TrackerSerial::open_with_paths(&["/dev/ttyUSB0"], CONSOLE_BAUD_RATE)?;
    /// println!("Console on {}", serial.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened serial port {} at {} baud", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(TrackerError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port (8N1, no flow control)
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TrackerError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Splits the port into a read half and a writable [`SerialPortIO`].
    pub fn split(
        self,
    ) -> (
        ReadHalf<tokio_serial::SerialStream>,
        TokioSerialPort<WriteHalf<tokio_serial::SerialStream>>,
    ) {
        let (reader, writer) = tokio::io::split(self.port);
        (reader, TokioSerialPort::new(writer))
    }
}

/// Reads console lines and posts each one as a command.
///
/// Replies go to `reply`, the console writer queue. Lines that are not
/// UTF-8 are logged and skipped.
///
/// # Errors
///
/// Returns error if the port fails or the reactive loop has stopped.
pub async fn run_console_reader<R: AsyncRead + Unpin>(
    reader: R,
    events: EventSender,
    reply: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let text = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(_) => {
                warn!("uart dropped non-text line '{}'", escape_log(&String::from_utf8_lossy(&buf)));
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }
        info!("uart received '{}'", escape_log(text));
        events
            .send(Event::Command {
                text: text.to_string(),
                reply: reply.clone(),
            })
            .map_err(|_| TrackerError::ChannelClosed("console commands"))?;
    }
    info!("Console closed");
    Ok(())
}

/// Writes queued replies and log lines to the console.
///
/// Write errors are logged and the data dropped. Returns when every sender is gone.
pub async fn run_console_writer<P: SerialPortIO>(mut port: P, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = port.write_all(&data).await {
            // Not logged through tracing: the UART sink would feed this loop
            eprintln!("Console write failed: {}", e);
            continue;
        }
        let _ = port.flush().await;
    }
}
