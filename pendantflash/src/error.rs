//! Error types for pendantflash.

use std::io;
use thiserror::Error;

/// Result type for pendantflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pendantflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error on an already open port.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Bad firmware file or arguments, detected before any hardware access.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The serial port could not be opened (busy, missing, permission denied).
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable {
        /// Port name/path.
        port: String,
        /// Reason reported by the operating system.
        reason: String,
    },

    /// The external flashing tool could not be located.
    #[error("Flash tool not found (searched for: {searched}); install it with `pip install esptool`")]
    ToolNotFound {
        /// Names or paths that were tried.
        searched: String,
    },

    /// The host did not clearly acknowledge leaving pass-through mode.
    #[error("Tunnel exit uncertain: {0}")]
    TunnelUncertain(String),

    /// The external flashing tool failed or could not be launched.
    #[error("Flashing failed: {reason}")]
    FlashFailed {
        /// Exit code of the tool, if it ran and exited normally.
        code: Option<i32>,
        /// Human readable failure description.
        reason: String,
    },

    /// The operator declined to continue at the bootloader prompt.
    #[error("Aborted by operator")]
    OperatorAborted,

    /// The embedding application requested an interrupt.
    #[error("Interrupted")]
    Interrupted,
}
