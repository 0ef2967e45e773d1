//! Configuration file support for ridepull.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RIDEPULL_*)
//! 3. Local config file (./ridepull.toml)
//! 4. Global config file (~/.config/ridepull/config.toml)
//!
//! `--config PATH` replaces discovery of (3) and (4).

use directories::ProjectDirs;
use log::{debug, info, warn};
use ridepull::DriverSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
const LOCAL_CONFIG: &str = "ridepull.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Port paths listed even when the OS does not report them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Remembered USB bridges, listed first when picking a port.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Download configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory rides are saved into.
    pub destination: Option<PathBuf>,
    /// Default device type (driver name).
    pub driver: Option<String>,
    /// Line silence (ms) that ends a serial capture.
    pub idle_timeout_ms: Option<u64>,
    /// Seconds to wait for the device to start sending.
    pub start_timeout_secs: Option<u64>,
    /// Raise DTR/RTS after opening the port.
    pub assert_dtr: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Download configuration.
    #[serde(default)]
    pub download: DownloadConfig,
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
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
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
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "ridepull")
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Default ride directory (`<data dir>/rides`).
    pub fn default_destination() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join("rides"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Port config
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        for path in other.port.connection.extra {
            if !self.port.connection.extra.contains(&path) {
                self.port.connection.extra.push(path);
            }
        }
        for device in other.port.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }

        // Download config
        let download = other.download;
        if download.destination.is_some() {
            self.download.destination = download.destination;
        }
        if download.driver.is_some() {
            self.download.driver = download.driver;
        }
        if download.idle_timeout_ms.is_some() {
            self.download.idle_timeout_ms = download.idle_timeout_ms;
        }
        if download.start_timeout_secs.is_some() {
            self.download.start_timeout_secs = download.start_timeout_secs;
        }
        if download.assert_dtr.is_some() {
            self.download.assert_dtr = download.assert_dtr;
        }
    }

    /// Whether the given bridge was remembered earlier.
    pub fn is_remembered(&self, vid: u16, pid: u16) -> bool {
        self.port
            .usb_device
            .iter()
            .any(|d| d.matches(vid, pid))
    }

    /// Driver settings from this config, with `baud` taking precedence.
    pub fn driver_settings(&self, baud: Option<u32>) -> DriverSettings {
        let defaults = DriverSettings::default();
        let download = &self.download;
        DriverSettings {
            baud_rate: baud
                .or(self.port.connection.baud)
                .unwrap_or(defaults.baud_rate),
            idle_timeout: download
                .idle_timeout_ms
                .map_or(defaults.idle_timeout, Duration::from_millis),
            start_timeout: download
                .start_timeout_secs
                .map_or(defaults.start_timeout, Duration::from_secs),
            assert_dtr: download
                .assert_dtr
                .unwrap_or(defaults.assert_dtr),
            ..defaults
        }
    }

    /// Save USB device for future port selection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        // Don't add duplicates
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        // Prefer the local file if there is one, else the global file
        let path = if Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_CONFIG)
        } else if let Some(global_path) = Self::global_config_path() {
            if let Some(dir) = global_path.parent() {
                fs::create_dir_all(dir)?;
            }
            global_path
        } else {
            PathBuf::from(LOCAL_CONFIG)
        };

        Self::append_usb_device(&path, device.clone())?;
        self.port.usb_device.push(device);
        info!("Saved USB device to {}", path.display());

        Ok(())
    }

    /// Add `device` to the file at `path`, keeping everything else in it.
    fn append_usb_device(path: &Path, device: UsbDevice) -> anyhow::Result<()> {
        let mut on_disk = Self::load_from_file(path).unwrap_or_default();
        if !on_disk.port.usb_device.contains(&device) {
            on_disk.port.usb_device.push(device);
        }
        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(path, content)?;
        Ok(())
    }
}
