//! Flash command implementation.

use {
    crate::{
        Chip, Cli, CliError,
        config::Config,
        mark_cleanup_pending,
        operator::TerminalGate,
        output::{Printer, Tone},
        was_interrupted,
    },
    anyhow::Result,
    log::debug,
    pendantflash::{
        Esptool, FlashJob, HandoffConfig, HandoffController, HandoffState, NativeOpener,
        PassthroughCommand, TargetChip, TunnelState,
        passthrough::{DEFAULT_TIMEOUT_SECS, DEFAULT_UART},
    },
    std::time::Duration,
};

const BANNER_WIDTH: usize = 60;

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted before flashing started".to_string()).into())
    } else {
        Ok(())
    }
}

/// Pick the chip: command line first, then config, then the default.
fn resolve_chip(cli_chip: Option<Chip>, config_chip: Option<&str>) -> Result<TargetChip> {
    if let Some(chip) = cli_chip {
        return Ok(chip.into());
    }
    match config_chip {
        Some(name) => TargetChip::from_name(name).ok_or_else(|| {
            anyhow::Error::from(CliError::Usage(format!(
                "Unknown chip '{name}' in config \
                 (expected one of esp32, esp32s2, esp32s3, esp32c3, esp32c6, esp8266)"
            )))
        }),
        None => Ok(TargetChip::default()),
    }
}

/// Build the flash job from the command line and config.
fn build_job(cli: &Cli, config: &Config) -> Result<FlashJob> {
    let chip = resolve_chip(cli.chip, config.flash.chip.as_deref())?;
    let mut job = FlashJob::new(cli.port.clone(), cli.firmware.clone()).with_chip(chip);
    if let Some(baud) = cli.flash_baud.or(config.flash.baud) {
        job = job.with_baud(baud);
    }
    if let Some(address) = cli.address {
        job = job.with_address(address);
    }
    Ok(job)
}

/// Build the host link settings from the command line and config.
fn build_handoff_config(cli: &Cli, config: &Config) -> Result<HandoffConfig> {
    let mut handoff = HandoffConfig::default();

    let uart = cli
        .uart
        .clone()
        .or_else(|| {
            config
                .link
                .uart
                .clone()
        })
        .unwrap_or_else(|| DEFAULT_UART.to_string());
    let timeout = cli
        .passthrough_timeout
        .or(config.link.passthrough_timeout)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    handoff.passthrough = PassthroughCommand::new(uart, timeout)?;

    if let Some(baud) = cli.baud.or(config.link.baud) {
        handoff.host_baud = baud;
    }
    if let Some(ms) = config.link.read_timeout_ms {
        handoff.read_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = config.timing.enter_settle_ms {
        handoff.timings.link.enter_settle = Duration::from_millis(ms);
    }
    if let Some(ms) = config.timing.release_grace_ms {
        handoff.timings.release_grace = Duration::from_millis(ms);
    }
    if let Some(ms) = config.timing.reacquire_grace_ms {
        handoff.timings.reacquire_grace = Duration::from_millis(ms);
    }
    Ok(handoff)
}

fn build_tool(cli: &Cli, config: &Config) -> Esptool {
    match cli
        .tool
        .as_ref()
        .or(config.flash.tool.as_ref())
    {
        Some(program) => Esptool::default().with_program(program),
        None => Esptool::default(),
    }
}

/// Progress line for a state, if the operator should see one.
fn stage_message(state: HandoffState) -> Option<(&'static str, Tone)> {
    match state {
        HandoffState::TunnelOpening => Some(("Entering pass-through mode...", Tone::Info)),
        HandoffState::AwaitingOperator => Some(("Pass-through mode entered", Tone::Success)),
        HandoffState::PortReleased => Some(("Port released to the flash tool", Tone::Info)),
        HandoffState::Flashing => Some(("Running esptool...", Tone::Info)),
        HandoffState::TunnelReopening => Some(("Exiting pass-through mode...", Tone::Info)),
        _ => None,
    }
}

fn print_banner(job: &FlashJob, printer: Printer) {
    let rule = "=".repeat(BANNER_WIDTH);
    printer.say(&rule, Tone::Header);
    printer.say(
        &format!("{} Pendant Flasher via Controller Pass-through", job.chip()),
        Tone::Header,
    );
    printer.say(&rule, Tone::Header);
    printer.say(&format!("Port: {}", job.port()), Tone::Plain);
    printer.say(
        &format!(
            "Firmware: {}",
            job.firmware()
                .display()
        ),
        Tone::Plain,
    );
    printer.say("", Tone::Plain);
}

/// Flash the pendant through the host controller.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, printer: Printer) -> Result<()> {
    ensure_not_interrupted()?;
    let job = build_job(cli, config)?;
    let handoff = build_handoff_config(cli, config)?;
    let tool = build_tool(cli, config);
    let chip = job.chip();
    debug!("Handoff settings: {handoff:?}");

    print_banner(&job, printer);

    let gate = TerminalGate::new(printer, was_interrupted);
    let mut controller = HandoffController::new(NativeOpener, tool, gate)
        .with_config(handoff)
        .with_interrupt_check(was_interrupted);

    let report = controller.run(job, &mut |state: HandoffState| {
        if state == HandoffState::PortReleased {
            mark_cleanup_pending();
        }
        if let Some((message, tone)) = stage_message(state) {
            printer.say(message, tone);
        }
    })?;

    if report.tunnel == TunnelState::Closed {
        printer.say("Successfully exited pass-through mode", Tone::Success);
    }
    for warning in &report.warnings {
        printer.shout(&format!("Warning: {warning}"), Tone::Warning);
    }

    match report.flash {
        Ok(()) => {
            printer.say("", Tone::Plain);
            printer.shout("Flashing completed successfully!", Tone::Success);
            printer.say(
                &format!("{chip} pendant should now be running the new firmware."),
                Tone::Success,
            );
            Ok(())
        },
        Err(e) => {
            printer.say("", Tone::Plain);
            printer.shout("Flashing failed!", Tone::Error);
            Err(e.into())
        },
    }
}
