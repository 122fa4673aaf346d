//! UART pass-through tunnel through the host controller.

pub mod protocol;
pub mod session;

pub use protocol::{
    DEFAULT_TIMEOUT_SECS, DEFAULT_UART, ExitAck, INTERRUPT, PassthroughCommand, STATUS_QUERY,
    TunnelState, classify_exit_response,
};
pub use session::{LinkSession, LinkTimings};
