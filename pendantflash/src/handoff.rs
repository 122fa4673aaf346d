//! Tunnel handoff controller.
//!
//! Drives one flash job through the host controller's pass-through tunnel:
//!
//! ```text
//! Idle -> TunnelOpening -> AwaitingOperator -> TunnelOpen -> PortReleased
//!      -> Flashing -> FlashDone -> TunnelReopening -> TunnelClosing -> Terminated
//! ```
//!
//! The serial port is held by a [`LinkSession`] up to `TunnelOpen`, by the
//! flash tool during `Flashing`, and by a second `LinkSession` from
//! `TunnelReopening` on. Each handoff closes the port first and waits a grace
//! interval before the next owner opens it.
//!
//! Once the port has been released, the cleanup phase always runs and its
//! problems only ever become warnings. The overall verdict is the flash
//! tool's.

use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::flasher::{FlashJob, FlashTool, Invocation};
use crate::operator::OperatorGate;
use crate::passthrough::{ExitAck, LinkSession, LinkTimings, PassthroughCommand, TunnelState};
use crate::port::{DEFAULT_HOST_BAUD, DEFAULT_READ_TIMEOUT, PortOpener, SerialConfig};

/// Controller states, in the order a full run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandoffState {
    /// Nothing touched yet.
    Idle,
    /// Port open, activation command being sent.
    TunnelOpening,
    /// Waiting for the operator to strap the pendant into its bootloader.
    AwaitingOperator,
    /// Operator confirmed; link session still owns the port.
    TunnelOpen,
    /// Port closed and given time to be released by the OS.
    PortReleased,
    /// External tool owns the port.
    Flashing,
    /// External tool finished, successfully or not.
    FlashDone,
    /// Reopening the port for cleanup.
    TunnelReopening,
    /// Sending the pass-through exit sequence.
    TunnelClosing,
    /// Run finished.
    Terminated,
}

impl fmt::Display for HandoffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::TunnelOpening => "opening tunnel",
            Self::AwaitingOperator => "awaiting operator",
            Self::TunnelOpen => "tunnel open",
            Self::PortReleased => "port released",
            Self::Flashing => "flashing",
            Self::FlashDone => "flash done",
            Self::TunnelReopening => "reopening port",
            Self::TunnelClosing => "closing tunnel",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Waits around each port handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffTimings {
    /// After closing the link session, before the flash tool starts.
    pub release_grace: Duration,
    /// After the flash tool exits, before the port is reopened.
    pub reacquire_grace: Duration,
    /// Delays inside the pass-through dialogue.
    pub link: LinkTimings,
}

impl Default for HandoffTimings {
    fn default() -> Self {
        Self {
            release_grace: Duration::from_secs(1),
            reacquire_grace: Duration::from_secs(2),
            link: LinkTimings::default(),
        }
    }
}

impl HandoffTimings {
    /// No delays at all.
    pub const fn none() -> Self {
        Self {
            release_grace: Duration::ZERO,
            reacquire_grace: Duration::ZERO,
            link: LinkTimings::none(),
        }
    }
}

/// Host link settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffConfig {
    /// Host controller command-port baud rate.
    pub host_baud: u32,
    /// Read timeout on the host link.
    pub read_timeout: Duration,
    /// Activation command.
    pub passthrough: PassthroughCommand,
    /// Grace intervals and settle delays.
    pub timings: HandoffTimings,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            host_baud: DEFAULT_HOST_BAUD,
            read_timeout: DEFAULT_READ_TIMEOUT,
            passthrough: PassthroughCommand::default(),
            timings: HandoffTimings::default(),
        }
    }
}

/// Outcome of a run that got as far as releasing the port.
#[derive(Debug)]
pub struct HandoffReport {
    /// Flash verdict. Decides overall success.
    pub flash: Result<()>,
    /// Tunnel state after cleanup.
    pub tunnel: TunnelState,
    /// Cleanup problems, never fatal.
    pub warnings: Vec<String>,
    /// The command line that was run.
    pub invocation: Invocation,
    /// Every state entered, in order.
    pub states: Vec<HandoffState>,
}

impl HandoffReport {
    /// Whether the firmware was written.
    pub fn is_success(&self) -> bool {
        self.flash
            .is_ok()
    }
}

/// Runs flash jobs through the pass-through tunnel.
pub struct HandoffController<O, T, G> {
    opener: O,
    tool: T,
    gate: G,
    config: HandoffConfig,
    state: HandoffState,
    states: Vec<HandoffState>,
    interrupted: fn() -> bool,
}

impl<O, T, G> HandoffController<O, T, G>
where
    O: PortOpener,
    T: FlashTool,
    G: OperatorGate,
{
    /// Create a controller with default host link settings.
    pub fn new(opener: O, tool: T, gate: G) -> Self {
        Self {
            opener,
            tool,
            gate,
            config: HandoffConfig::default(),
            state: HandoffState::Idle,
            states: vec![HandoffState::Idle],
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Replace the host link settings.
    #[must_use]
    pub fn with_config(mut self, config: HandoffConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the interrupt check consulted after the operator prompt and
    /// again before the flash tool starts.
    #[must_use]
    pub fn with_interrupt_check(mut self, interrupted: fn() -> bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Current state.
    pub fn state(&self) -> HandoffState {
        self.state
    }

    /// The flash tool, e.g. to inspect a fake after a run.
    pub fn tool(&self) -> &T {
        &self.tool
    }

    fn enter(&mut self, state: HandoffState, on_state: &mut dyn FnMut(HandoffState)) {
        debug!("Handoff: {} -> {}", self.state, state);
        self.state = state;
        self.states
            .push(state);
        on_state(state);
    }

    fn serial_config(&self, port: &str) -> SerialConfig {
        SerialConfig::new(port, self.config.host_baud).with_timeout(self.config.read_timeout)
    }

    /// Run `job` to completion.
    ///
    /// `Err` means the run aborted before the port was handed to the flash
    /// tool; nothing was flashed. An interrupt after the port was released
    /// still closes the tunnel before returning `Err`. `Ok` carries the
    /// report of a run that reached the flash step, whatever its verdict.
    pub fn run(
        &mut self,
        job: FlashJob,
        on_state: &mut dyn FnMut(HandoffState),
    ) -> Result<HandoffReport> {
        self.state = HandoffState::Idle;
        self.states = vec![HandoffState::Idle];

        let program = match self.prepare(&job) {
            Ok(program) => program,
            Err(e) => {
                self.enter(HandoffState::Terminated, on_state);
                return Err(e);
            },
        };

        if let Err(e) = self.open_tunnel(&job, on_state) {
            error!("Tunnel setup failed: {e}");
            self.enter(HandoffState::Terminated, on_state);
            return Err(e);
        }

        if (self.interrupted)() {
            // The host is still relaying: put it back in command mode first.
            warn!("Interrupted before flashing, closing the tunnel");
            let (_, warnings) = self.close_tunnel(&job, on_state);
            for warning in &warnings {
                warn!("{warning}");
            }
            self.enter(HandoffState::Terminated, on_state);
            return Err(Error::Interrupted);
        }

        let (invocation, flash) = self.flash(&program, &job, on_state);
        let (tunnel, warnings) = self.close_tunnel(&job, on_state);

        self.enter(HandoffState::Terminated, on_state);
        Ok(HandoffReport {
            flash,
            tunnel,
            warnings,
            invocation,
            states: self
                .states
                .clone(),
        })
    }

    /// Checks that need no hardware.
    fn prepare(&self, job: &FlashJob) -> Result<PathBuf> {
        job.validate()?;
        let program = self
            .tool
            .locate()?;
        info!("Flash tool: {}", program.display());
        Ok(program)
    }

    /// `Idle` through `PortReleased`. The session is dropped, and the port
    /// closed, on every path out of here.
    fn open_tunnel(
        &mut self,
        job: &FlashJob,
        on_state: &mut dyn FnMut(HandoffState),
    ) -> Result<()> {
        let config = self.serial_config(job.port());
        let timings = self.config.timings;

        self.enter(HandoffState::TunnelOpening, on_state);
        let mut session = LinkSession::open(&mut self.opener, &config, timings.link)?;
        session.enter_passthrough(&self.config.passthrough)?;

        self.enter(HandoffState::AwaitingOperator, on_state);
        let interrupted = self.interrupted;
        let confirmed = session
            .request_operator_precondition(&mut self.gate)
            .and_then(|()| {
                if interrupted() {
                    Err(Error::Interrupted)
                } else {
                    Ok(())
                }
            });
        if let Err(e) = confirmed {
            // Still our port: try to hand the host back its console.
            if let Err(exit_err) = session.exit_passthrough() {
                warn!("Could not exit pass-through after abort: {exit_err}");
            }
            return Err(e);
        }

        self.enter(HandoffState::TunnelOpen, on_state);
        session.close();
        drop(session);

        debug!("Waiting {:?} for the port to be released", timings.release_grace);
        thread::sleep(timings.release_grace);
        self.enter(HandoffState::PortReleased, on_state);
        Ok(())
    }

    /// `Flashing` and `FlashDone`. No port I/O here.
    fn flash(
        &mut self,
        program: &std::path::Path,
        job: &FlashJob,
        on_state: &mut dyn FnMut(HandoffState),
    ) -> (Invocation, Result<()>) {
        let invocation = self
            .tool
            .build_invocation(program, job);

        self.enter(HandoffState::Flashing, on_state);
        let verdict = match self
            .tool
            .run(&invocation)
        {
            Ok(exit) if exit.success() => Ok(()),
            Ok(exit) => Err(Error::FlashFailed {
                code: exit.code(),
                reason: match exit.code() {
                    Some(code) => format!("flash tool exited with status {code}"),
                    None => "flash tool was terminated by a signal".to_string(),
                },
            }),
            Err(e) => Err(Error::FlashFailed {
                code: None,
                reason: format!("could not launch {}: {e}", invocation.program.display()),
            }),
        };

        match &verdict {
            Ok(()) => info!("Firmware written"),
            Err(e) => error!("{e}"),
        }
        self.enter(HandoffState::FlashDone, on_state);
        (invocation, verdict)
    }

    /// `TunnelReopening` and `TunnelClosing`. Never fails.
    fn close_tunnel(
        &mut self,
        job: &FlashJob,
        on_state: &mut dyn FnMut(HandoffState),
    ) -> (TunnelState, Vec<String>) {
        let config = self.serial_config(job.port());
        let timings = self.config.timings;
        let mut warnings = Vec::new();

        debug!("Waiting {:?} for the flash tool to release the port", timings.reacquire_grace);
        thread::sleep(timings.reacquire_grace);
        self.enter(HandoffState::TunnelReopening, on_state);

        let mut session = match LinkSession::open(&mut self.opener, &config, timings.link) {
            Ok(session) => session,
            Err(e) => {
                debug!("Could not reopen {} to exit pass-through: {e}", job.port());
                warnings.push(format!(
                    "could not reopen port to exit pass-through ({e}); the host reverts after {}s",
                    self.config
                        .passthrough
                        .timeout_secs()
                ));
                return (TunnelState::Unknown, warnings);
            },
        };

        self.enter(HandoffState::TunnelClosing, on_state);
        let tunnel = match session.exit_passthrough() {
            Ok(ExitAck::Confirmed) => TunnelState::Closed,
            Ok(ExitAck::Uncertain) => {
                let reason = "no 'ok' or 'error:' reply from host; \
                              power-cycle it if it stays unresponsive";
                warnings.push(Error::TunnelUncertain(reason.to_string()).to_string());
                TunnelState::Unknown
            },
            Err(e) => {
                debug!("Pass-through exit failed: {e}");
                warnings.push(format!("pass-through exit failed: {e}"));
                TunnelState::Unknown
            },
        };
        session.close();
        (tunnel, warnings)
    }
}
