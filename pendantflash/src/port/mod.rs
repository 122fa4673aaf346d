//! Port abstraction for the single shared serial endpoint.
//!
//! The host controller's USB serial port is owned by exactly one party at a
//! time: a [`LinkSession`](crate::passthrough::LinkSession) while the tunnel is
//! being opened or closed, or the external flash tool in between. Opening goes
//! through a [`PortOpener`] so the handoff logic never names a concrete port
//! type.
//!
//! ```text
//! +------------------+        +------------------+
//! |   LinkSession    |        | HandoffController|
//! +--------+---------+        +--------+---------+
//!          |                           |
//!          v                           v
//! +--------+---------+        +--------+---------+
//! |    Port trait    | <----- |  PortOpener      |
//! +--------+---------+        +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate the host controller's command port runs at.
pub const DEFAULT_HOST_BAUD: u32 = 115_200;

/// Default read timeout on the host link.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_HOST_BAUD,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open serial endpoint.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Discard pending input only.
    fn clear_input(&mut self) -> Result<()>;

    /// Number of bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Close the port and release the device node.
    ///
    /// Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Capability to open the shared serial endpoint.
///
/// Implementations map any open failure to
/// [`Error::PortUnavailable`](crate::Error::PortUnavailable).
pub trait PortOpener {
    /// Concrete port type produced by this opener.
    type Port: Port;

    /// Open the port described by `config`.
    fn open(&mut self, config: &SerialConfig) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
pub use native::{NativeOpener, NativePort};
