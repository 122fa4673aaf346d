//! Configuration file support for pendantflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PENDANTFLASH_*)
//! 3. Local config file (./pendantflash.toml)
//! 4. Global config file (~/.config/pendantflash/config.toml)
//!
//! ```toml
//! [link]
//! baud = 115200
//! uart = "Uart1"
//! passthrough_timeout = 120
//!
//! [flash]
//! chip = "esp32s3"
//! baud = 115200
//! tool = "/opt/esptool/esptool.py"
//!
//! [timing]
//! release_grace_ms = 1000
//! reacquire_grace_ms = 2000
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "pendantflash.toml";

/// Host controller link settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Host command-port baud rate.
    pub baud: Option<u32>,
    /// Relay UART name in the pass-through command.
    pub uart: Option<String>,
    /// Pass-through auto-revert duration in seconds.
    pub passthrough_timeout: Option<u32>,
    /// Read timeout on the host link in milliseconds.
    pub read_timeout_ms: Option<u64>,
}

/// Flash tool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Chip name passed to the flash tool.
    pub chip: Option<String>,
    /// Flash tool baud rate.
    pub baud: Option<u32>,
    /// Explicit flash tool executable.
    pub tool: Option<PathBuf>,
}

/// Grace intervals around the port handoffs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Delay after the pass-through command, in milliseconds.
    pub enter_settle_ms: Option<u64>,
    /// Delay between closing the link and starting the flash tool.
    pub release_grace_ms: Option<u64>,
    /// Delay between the flash tool exiting and reopening the link.
    pub reacquire_grace_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Host link configuration.
    #[serde(default)]
    pub link: LinkConfig,
    /// Flash tool configuration.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Timing configuration.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {} (invalid TOML): {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pendantflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.link.baud, other.link.baud);
        take(&mut self.link.uart, other.link.uart);
        take(&mut self.link.passthrough_timeout, other.link.passthrough_timeout);
        take(&mut self.link.read_timeout_ms, other.link.read_timeout_ms);

        take(&mut self.flash.chip, other.flash.chip);
        take(&mut self.flash.baud, other.flash.baud);
        take(&mut self.flash.tool, other.flash.tool);

        take(&mut self.timing.enter_settle_ms, other.timing.enter_settle_ms);
        take(&mut self.timing.release_grace_ms, other.timing.release_grace_ms);
        take(&mut self.timing.reacquire_grace_ms, other.timing.reacquire_grace_ms);
    }
}
