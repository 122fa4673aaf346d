//! pendantflash CLI - flash an ESP32-class pendant through a host
//! controller's UART pass-through.
//!
//! ## Features
//!
//! - Opens and closes the host's pass-through tunnel around the flash
//! - Walks the operator through manual bootloader entry
//! - Runs `esptool` with reset lines left alone
//! - Config files and environment variable support

use {
    anyhow::Result,
    clap::{Parser, ValueEnum},
    env_logger::Env,
    log::debug,
    pendantflash::TargetChip,
    std::{
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
    thiserror::Error,
};

mod commands;
mod config;
mod operator;
mod output;

use {
    config::Config,
    output::{Printer, Tone, stderr_colors},
};

/// CLI-level failures that do not come from the library.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad flag combination or config value.
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Set once the port is handed to the flash tool; from then on the tunnel
/// must be closed before the process exits.
static CLEANUP_PENDING: AtomicBool = AtomicBool::new(false);

/// Whether Ctrl-C was pressed during this run.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Keep later Ctrl-C presses from skipping the tunnel cleanup.
pub(crate) fn mark_cleanup_pending() {
    CLEANUP_PENDING.store(true, Ordering::Relaxed);
}

/// What to tell the user on Ctrl-C; `None` means quit right away.
fn interrupt_notice(already_interrupted: bool, cleanup_pending: bool) -> Option<&'static str> {
    match (already_interrupted, cleanup_pending) {
        (_, true) => Some("Interrupted: restoring the host controller console before exiting..."),
        (false, false) => {
            Some("Interrupted: stopping after the current step (press Ctrl-C again to force quit)")
        },
        (true, false) => None,
    }
}

/// pendantflash - flash a pendant through a FluidNC-style controller.
///
/// The controller relays its UART to the pendant while pass-through mode is
/// active. You will be asked to put the pendant into bootloader mode by hand.
///
/// Environment variables:
///   PENDANTFLASH_PORT   - Host controller serial port
///   PENDANTFLASH_TOOL   - Path to the esptool executable
#[derive(Parser, Debug)]
#[command(name = "pendantflash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port of the host controller.
    #[arg(short, long, env = "PENDANTFLASH_PORT")]
    port: String,

    /// Firmware image to write.
    #[arg(short, long, value_name = "FILE")]
    firmware: PathBuf,

    /// Pendant chip type [default: esp32s3].
    #[arg(long, value_enum)]
    chip: Option<Chip>,

    /// Host link baud rate [default: 115200].
    #[arg(short, long)]
    baud: Option<u32>,

    /// Baud rate used by the flash tool [default: 115200].
    #[arg(long)]
    flash_baud: Option<u32>,

    /// Host UART relayed to the pendant [default: Uart1].
    #[arg(long)]
    uart: Option<String>,

    /// Seconds before the host leaves pass-through on its own [default: 120].
    #[arg(long, value_name = "SECS")]
    passthrough_timeout: Option<u32>,

    /// Flash address of the image [default: 0x0].
    #[arg(short, long, value_parser = parse_hex_u32)]
    address: Option<u32>,

    /// Path to the esptool executable (searched on PATH if not given).
    #[arg(long, value_name = "PATH", env = "PENDANTFLASH_TOOL")]
    tool: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,
}

/// Supported chip types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Chip {
    Esp32,
    Esp32s2,
    /// ESP32-S3 (default).
    Esp32s3,
    Esp32c3,
    Esp32c6,
    Esp8266,
}

impl From<Chip> for TargetChip {
    fn from(chip: Chip) -> Self {
        match chip {
            Chip::Esp32 => TargetChip::Esp32,
            Chip::Esp32s2 => TargetChip::Esp32S2,
            Chip::Esp32s3 => TargetChip::Esp32S3,
            Chip::Esp32c3 => TargetChip::Esp32C3,
            Chip::Esp32c6 => TargetChip::Esp32C6,
            Chip::Esp8266 => TargetChip::Esp8266,
        }
    }
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

fn init_logging(verbose: u8, quiet: bool) {
    let log_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(verbose >= 2)
        .format_timestamp(if verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler(printer: Printer) {
    let result = ctrlc::set_handler(move || {
        let already = INTERRUPTED.swap(true, Ordering::Relaxed);
        match interrupt_notice(already, CLEANUP_PENDING.load(Ordering::Relaxed)) {
            Some(notice) => printer.shout(notice, Tone::Warning),
            None => std::process::exit(130),
        }
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    pendantflash::set_interrupt_checker(was_interrupted);
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<pendantflash::Error>() {
            return match lib_err {
                pendantflash::Error::InvalidInput(_) => 2,
                pendantflash::Error::PortUnavailable { .. } => 4,
                pendantflash::Error::ToolNotFound { .. } => 5,
                pendantflash::Error::OperatorAborted | pendantflash::Error::Interrupted => 130,
                _ => 1,
            };
        }
    }
    1
}

/// Next step to suggest for an error, if there is a useful one.
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    let lib_err = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<pendantflash::Error>())?;
    match lib_err {
        pendantflash::Error::PortUnavailable { .. } => {
            Some("Check the port name and close any serial monitor using it.")
        },
        pendantflash::Error::ToolNotFound { .. } => {
            Some("Or pass the esptool location with --tool.")
        },
        pendantflash::Error::FlashFailed { .. } => {
            Some("Please check connections and try again.")
        },
        pendantflash::Error::OperatorAborted | pendantflash::Error::Interrupted => {
            Some("Nothing was flashed.")
        },
        _ => None,
    }
}

fn run(cli: &Cli, printer: Printer) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    commands::flash::cmd_flash(cli, &config, printer)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    debug!(
        "pendantflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let printer = Printer {
        colors: stderr_colors(),
        quiet: cli.quiet,
    };
    install_interrupt_handler(printer);

    match run(&cli, printer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            printer.shout(&format!("Error: {err:#}"), Tone::Error);
            if let Some(hint) = hint_for(&err) {
                printer.shout(hint, Tone::Plain);
            }
            ExitCode::from(exit_code_for(&err))
        },
    }
}
