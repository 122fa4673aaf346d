//! Flash job description.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Baud rate used by the flash tool through the tunnel.
pub const DEFAULT_FLASH_BAUD: u32 = 115_200;

/// Chip targets the flash tool is asked to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetChip {
    /// ESP32.
    Esp32,
    /// ESP32-S2.
    Esp32S2,
    /// ESP32-S3 (the usual pendant MCU).
    #[default]
    Esp32S3,
    /// ESP32-C3.
    Esp32C3,
    /// ESP32-C6.
    Esp32C6,
    /// ESP8266.
    Esp8266,
}

impl TargetChip {
    /// Name understood by `esptool --chip`.
    pub fn esptool_name(self) -> &'static str {
        match self {
            Self::Esp32 => "esp32",
            Self::Esp32S2 => "esp32s2",
            Self::Esp32S3 => "esp32s3",
            Self::Esp32C3 => "esp32c3",
            Self::Esp32C6 => "esp32c6",
            Self::Esp8266 => "esp8266",
        }
    }

    /// Parse a chip name, ignoring case and dashes (`ESP32-S3`, `esp32s3`).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "esp32" => Some(Self::Esp32),
            "esp32s2" => Some(Self::Esp32S2),
            "esp32s3" => Some(Self::Esp32S3),
            "esp32c3" => Some(Self::Esp32C3),
            "esp32c6" => Some(Self::Esp32C6),
            "esp8266" => Some(Self::Esp8266),
            _ => None,
        }
    }
}

impl fmt::Display for TargetChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Esp32 => write!(f, "ESP32"),
            Self::Esp32S2 => write!(f, "ESP32-S2"),
            Self::Esp32S3 => write!(f, "ESP32-S3"),
            Self::Esp32C3 => write!(f, "ESP32-C3"),
            Self::Esp32C6 => write!(f, "ESP32-C6"),
            Self::Esp8266 => write!(f, "ESP8266"),
        }
    }
}

/// One firmware write, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJob {
    port: String,
    firmware: PathBuf,
    chip: TargetChip,
    baud: u32,
    address: u32,
}

impl FlashJob {
    /// Job for `firmware` on `port` with manual-strap defaults.
    pub fn new(port: impl Into<String>, firmware: impl Into<PathBuf>) -> Self {
        Self {
            port: port.into(),
            firmware: firmware.into(),
            chip: TargetChip::default(),
            baud: DEFAULT_FLASH_BAUD,
            address: 0,
        }
    }

    /// Set the chip target.
    #[must_use]
    pub fn with_chip(mut self, chip: TargetChip) -> Self {
        self.chip = chip;
        self
    }

    /// Set the flash tool's baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Set the flash address of the image.
    #[must_use]
    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    /// Serial port name/path.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Firmware image path.
    pub fn firmware(&self) -> &Path {
        &self.firmware
    }

    /// Chip target.
    pub fn chip(&self) -> TargetChip {
        self.chip
    }

    /// Flash tool baud rate.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Flash address of the image.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Check the job can run without touching any hardware.
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(Error::InvalidInput("serial port name is empty".to_string()));
        }
        if self.baud == 0 {
            return Err(Error::InvalidInput("flash baud rate must be non-zero".to_string()));
        }

        let shown = self.firmware.display();
        if !self.firmware.exists() {
            return Err(Error::InvalidInput(format!("firmware file '{shown}' not found")));
        }
        if !self.firmware.is_file() {
            return Err(Error::InvalidInput(format!("firmware path '{shown}' is not a file")));
        }
        File::open(&self.firmware).map_err(|e| {
            Error::InvalidInput(format!("firmware file '{shown}' is not readable: {e}"))
        })?;
        Ok(())
    }
}
