//! Host controller pass-through dialogue.
//!
//! The controller speaks a line-oriented text protocol. Pass-through is
//! entered with a settings command naming the relay UART and an auto-revert
//! duration:
//!
//! ```text
//! $Uart/Passthrough=Uart1:120s\n
//! ```
//!
//! Once accepted the controller stops being itself and relays raw bytes, so
//! there is no acknowledgement to wait for. Leaving is requested with an
//! interrupt byte (Ctrl-C) followed by a newline; any reply containing `ok` or
//! `error:` shows the command interpreter is back.

use std::fmt;

use crate::error::{Error, Result};

/// Interrupt byte that ends pass-through mode.
pub const INTERRUPT: u8 = 0x03;

/// Line sent after the interrupt to provoke a reply.
pub const STATUS_QUERY: &[u8] = b"\n";

/// Default relay UART on the host controller.
pub const DEFAULT_UART: &str = "Uart1";

/// Default auto-revert duration in seconds.
pub const DEFAULT_TIMEOUT_SECS: u32 = 120;

/// Reply tokens treated as "command interpreter is back".
const ACK_TOKENS: [&str; 2] = ["ok", "error:"];

/// Tunnel state as far as this side can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelState {
    /// Host is in command mode.
    #[default]
    Closed,
    /// Pass-through was requested and is assumed active.
    Open,
    /// An exit was attempted but not confirmed.
    Unknown,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classification of the reply read after requesting pass-through exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAck {
    /// Reply carried a known acknowledgement token.
    Confirmed,
    /// Reply was empty, garbled, or carried no known token.
    Uncertain,
}

impl ExitAck {
    /// Tunnel state implied by this classification.
    pub fn tunnel_state(self) -> TunnelState {
        match self {
            Self::Confirmed => TunnelState::Closed,
            Self::Uncertain => TunnelState::Unknown,
        }
    }
}

/// Classify whatever the host sent back after an exit request.
///
/// This is a substring heuristic: a late or partial reply can be
/// misclassified either way.
pub fn classify_exit_response(response: &[u8]) -> ExitAck {
    let text = String::from_utf8_lossy(response).to_lowercase();
    if ACK_TOKENS
        .iter()
        .any(|token| text.contains(token))
    {
        ExitAck::Confirmed
    } else {
        ExitAck::Uncertain
    }
}

/// The pass-through activation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughCommand {
    uart: String,
    timeout_secs: u32,
}

impl Default for PassthroughCommand {
    fn default() -> Self {
        Self {
            uart: DEFAULT_UART.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PassthroughCommand {
    /// Build a command for `uart` reverting after `timeout_secs`.
    ///
    /// The UART name is embedded verbatim in a settings line, so it must be
    /// a plain identifier, and the duration must be non-zero.
    pub fn new(uart: impl Into<String>, timeout_secs: u32) -> Result<Self> {
        let uart = uart.into();
        if uart.is_empty()
            || !uart
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::InvalidInput(format!(
                "invalid pass-through UART name '{uart}'"
            )));
        }
        if timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "pass-through timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(Self { uart, timeout_secs })
    }

    /// Relay UART name.
    pub fn uart(&self) -> &str {
        &self.uart
    }

    /// Auto-revert duration in seconds.
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Wire encoding, newline terminated.
    pub fn encode(&self) -> Vec<u8> {
        format!("$Uart/Passthrough={}:{}s\n", self.uart, self.timeout_secs).into_bytes()
    }
}
