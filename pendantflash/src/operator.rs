//! Operator synchronization point.
//!
//! Putting the pendant into its ROM bootloader needs hands on the board. The
//! library describes what to do and blocks on an [`OperatorGate`] until the
//! operator confirms or aborts.

use crate::error::Result;

/// Manual bootloader-entry sequence for an ESP32-class pendant.
pub const BOOTLOADER_STEPS: [&str; 3] = [
    "Press and hold GPIO0 (BOOT button)",
    "Press and release EN (RESET button)",
    "Release GPIO0 (BOOT button)",
];

/// What the operator is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorPrompt {
    /// Headline shown above the steps.
    pub title: &'static str,
    /// Ordered physical actions.
    pub steps: &'static [&'static str],
}

/// Prompt used while the tunnel is open and waiting for the pendant.
pub const BOOTLOADER_PROMPT: OperatorPrompt = OperatorPrompt {
    title: "Now put the pendant in bootloader mode:",
    steps: &BOOTLOADER_STEPS,
};

/// Blocking confirmation from a human.
pub trait OperatorGate {
    /// Show `prompt` and block until the operator answers.
    ///
    /// Returns `Ok(true)` to continue and `Ok(false)` to abort the run. There
    /// is no timeout.
    fn confirm(&mut self, prompt: &OperatorPrompt) -> Result<bool>;
}

impl<G: OperatorGate + ?Sized> OperatorGate for &mut G {
    fn confirm(&mut self, prompt: &OperatorPrompt) -> Result<bool> {
        (**self).confirm(prompt)
    }
}
