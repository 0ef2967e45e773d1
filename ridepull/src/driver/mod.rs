//! Device drivers and the process-wide driver registry.
//!
//! A driver pulls one recording off a device reached through a [`PortInfo`]
//! and leaves it in a private temporary file inside the destination
//! directory. Publishing that file is the controller's job, not the driver's.
//!
//! Cancellation is cooperative: the progress callback is the only channel,
//! and a `false` return means "stop now". Drivers consult it at least once per
//! blocking protocol step.

mod capture;
mod ymodem;

pub use capture::{SerialCaptureDriver, capture};
pub use ymodem::YmodemDriver;

use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, SerialConfig};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Successful driver output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    /// Fully written, synced and closed temporary file.
    pub temp_path: PathBuf,
    /// Name the file should be published under.
    pub file_name: String,
}

/// A protocol implementation that can pull recorded data off one class of
/// device.
///
/// Drivers are stateless across calls; everything a transfer needs arrives as
/// arguments.
pub trait DeviceDriver: Send + Sync {
    /// Display name, also used as the registry key.
    fn name(&self) -> &str;

    /// Run a transfer against `port`, writing into a temporary file in
    /// `dest_dir`.
    ///
    /// `on_progress` receives human-readable status text and returns `false`
    /// to request cancellation, which must surface as [`Error::Canceled`].
    /// On any error the driver removes its own intermediate files.
    fn download(
        &self,
        port: &PortInfo,
        dest_dir: &Path,
        on_progress: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Downloaded>;
}

/// Report `status` and turn a cancellation request into [`Error::Canceled`].
pub fn check_progress(on_progress: &mut dyn FnMut(&str) -> bool, status: &str) -> Result<()> {
    if on_progress(status) {
        Ok(())
    } else {
        debug!("Cancellation requested at: {status}");
        Err(Error::Canceled)
    }
}

/// Serial parameters shared by the built-in drivers.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Line speed.
    pub baud_rate: u32,
    /// Upper bound for one blocking read; also the cancellation latency.
    pub read_timeout: Duration,
    /// How long to wait for the device to start sending.
    pub start_timeout: Duration,
    /// Silence after which a capture is considered complete.
    pub idle_timeout: Duration,
    /// Raise DTR and RTS after opening (many cradles power the UART from them).
    pub assert_dtr: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            read_timeout: Duration::from_millis(250),
            start_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(2),
            assert_dtr: true,
        }
    }
}

impl DriverSettings {
    /// Serial configuration for opening `port`.
    pub fn serial_config(&self, port: &PortInfo) -> SerialConfig {
        SerialConfig::new(port.name.clone(), self.baud_rate).with_timeout(self.read_timeout)
    }
}

/// Ordered table of drivers keyed by display name.
///
/// Registration order is display order; the first driver is the default.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn DeviceDriver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.names())
            .finish()
    }
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in drivers configured with `settings`.
    pub fn with_builtin(settings: &DriverSettings) -> Self {
        let mut registry = Self::new();
        registry.register(SerialCaptureDriver::new(settings.clone()));
        registry.register(YmodemDriver::new(settings.clone()));
        registry
    }

    /// Add a driver, replacing any driver with the same name in place.
    pub fn register<D: DeviceDriver + 'static>(&mut self, driver: D) -> &mut Self {
        let driver: Arc<dyn DeviceDriver> = Arc::new(driver);
        match self
            .drivers
            .iter()
            .position(|d| d.name().eq_ignore_ascii_case(driver.name()))
        {
            Some(idx) => self.drivers[idx] = driver,
            None => self.drivers.push(driver),
        }
        self
    }

    /// Look up a driver by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn DeviceDriver>> {
        self.drivers
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Driver names in display order.
    pub fn names(&self) -> Vec<&str> {
        self.drivers
            .iter()
            .map(|d| d.name())
            .collect()
    }

    /// Name of the default driver, if any is registered.
    pub fn default_name(&self) -> Option<&str> {
        self.drivers
            .first()
            .map(|d| d.name())
    }

    /// Whether no drivers are registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

static REGISTRY: OnceLock<DriverRegistry> = OnceLock::new();

/// Install the process-wide registry.
///
/// Must happen before the first call to [`registry`]; afterwards the table is
/// read-only and the rejected registry is handed back.
pub fn install_registry(registry: DriverRegistry) -> std::result::Result<(), DriverRegistry> {
    REGISTRY.set(registry)
}

/// The process-wide registry (built-in drivers with default settings unless
/// one was installed).
pub fn registry() -> &'static DriverRegistry {
    REGISTRY.get_or_init(|| DriverRegistry::with_builtin(&DriverSettings::default()))
}

/// Raise the control lines if configured and drop stale input.
pub(crate) fn prepare_port(port: &mut dyn Port, settings: &DriverSettings) -> Result<()> {
    if settings.assert_dtr {
        port.set_dtr(true)?;
        port.set_rts(true)?;
    }
    port.clear_buffers()
}

/// Close `port`, logging instead of failing.
pub(crate) fn release_port(port: &mut dyn Port) {
    if let Err(e) = port.close() {
        warn!("Failed to close {}: {e}", port.name());
    }
}

/// Fallback file name: `<prefix>_<unix seconds>.<ext>`.
pub(crate) fn timestamped_name(prefix: &str, ext: &str) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("{prefix}_{secs}.{ext}")
}

/// Temporary file in `dir`, on the same filesystem as the final destination.
pub(crate) fn temp_file_in(dir: &Path) -> Result<tempfile::NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(".ridepull-")
        .suffix(".part")
        .tempfile_in(dir)?)
}

/// Sync, close and keep a finished temporary file.
pub(crate) fn keep_temp(file: tempfile::NamedTempFile) -> Result<PathBuf> {
    file.as_file().sync_all()?;
    let (_file, path) = file
        .keep()
        .map_err(|e| Error::Io(e.error))?;
    Ok(path)
}
