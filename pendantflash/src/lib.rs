//! # pendantflash
//!
//! Flash firmware onto a pendant microcontroller that is only reachable
//! through a host controller's UART pass-through tunnel.
//!
//! The flashing itself is delegated to an external tool (`esptool`). This
//! crate handles everything around it:
//!
//! - Opening the tunnel with the host's pass-through command
//! - Waiting for the operator to strap the pendant into its bootloader
//! - Handing exclusive ownership of the serial port to the flash tool
//! - Reopening the port afterwards and returning the host to command mode
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use pendantflash::{
//!     Esptool, FlashJob, HandoffController, HandoffState, NativeOpener, OperatorGate,
//!     OperatorPrompt,
//! };
//!
//! struct AlwaysReady;
//!
//! impl OperatorGate for AlwaysReady {
//!     fn confirm(&mut self, _prompt: &OperatorPrompt) -> pendantflash::Result<bool> {
//!         Ok(true)
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let job = FlashJob::new("/dev/ttyUSB0", "pendant.bin");
//!     let mut controller = HandoffController::new(NativeOpener, Esptool::default(), AlwaysReady);
//!
//!     let report = controller.run(job, &mut |state: HandoffState| println!("{state}"))?;
//!     for warning in &report.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     report.flash?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod flasher;
pub mod handoff;
pub mod operator;
pub mod passthrough;
pub mod port;

#[cfg(test)]
pub(crate) mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker.
///
/// The checker should return `true` when the run should stop (for example
/// after Ctrl-C). It is only consulted before the port is handed to the
/// flash tool; after that the cleanup phase always runs.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativeOpener, NativePort};
pub use {
    error::{Error, Result},
    flasher::{Esptool, FlashJob, FlashTool, Invocation, TargetChip, ToolExit},
    handoff::{HandoffConfig, HandoffController, HandoffReport, HandoffState, HandoffTimings},
    operator::{BOOTLOADER_PROMPT, OperatorGate, OperatorPrompt},
    passthrough::{
        ExitAck, LinkSession, LinkTimings, PassthroughCommand, TunnelState, classify_exit_response,
    },
    port::{Port, PortOpener, SerialConfig},
};
