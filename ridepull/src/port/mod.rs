//! Port discovery and serial I/O.
//!
//! Two concerns live here:
//!
//! - **Discovery**: a [`PortEnumerator`] produces a [`PortScan`], the ordered
//!   list of [`PortInfo`] endpoints currently attached plus an optional
//!   non-fatal warning. A scan never fails as a whole; an empty list is a
//!   valid answer.
//! - **I/O**: drivers talk to an opened endpoint through the [`Port`] trait,
//!   which keeps protocol code independent of the `serialport` crate and lets
//!   tests substitute an in-memory port.
//!
//! ```text
//! PortEnumerator::scan() ──> PortScan { ports, warning }
//!                                  │ selection
//!                                  v
//!                     DeviceDriver::download(&PortInfo, ..)
//!                                  │ open_port(&SerialConfig)
//!                                  v
//!                            Box<dyn Port>
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::device::DeviceKind;
use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout. Bounds how long a single read may block.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            timeout: Duration::from_millis(250),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// An attached communication endpoint, as listed by a scan.
///
/// Immutable once listed; a rescan produces new values rather than updating
/// old ones.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified USB-serial bridge.
    pub device: DeviceKind,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Describe a port known only by its path.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Describe a USB port, classifying the bridge from its VID/PID.
    #[must_use]
    pub fn with_usb(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self.device = DeviceKind::from_vid_pid(vid, pid);
        self
    }
}

/// Result of one enumeration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortScan {
    /// Ports in discovery order.
    pub ports: Vec<PortInfo>,
    /// Non-fatal problem worth showing to the user (e.g. missing drivers).
    pub warning: Option<String>,
}

impl PortScan {
    /// A scan that found the given ports without complaint.
    pub fn new(ports: Vec<PortInfo>) -> Self {
        Self {
            ports,
            warning: None,
        }
    }

    /// Attach a warning to this scan.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// Whether no ports were found.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Number of ports found.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Index of the port with the given name (exact match, then
    /// case-insensitive for Windows-style names).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.ports
            .iter()
            .position(|p| p.name == name)
            .or_else(|| {
                self.ports
                    .iter()
                    .position(|p| p.name.eq_ignore_ascii_case(name))
            })
    }
}

/// Source of port listings.
///
/// Implementations must be side-effect free beyond the query itself so they
/// can be re-run at any time.
pub trait PortEnumerator {
    /// List the currently attached ports.
    fn scan(&self) -> PortScan;
}

impl<F> PortEnumerator for F
where
    F: Fn() -> PortScan,
{
    fn scan(&self) -> PortScan {
        self()
    }
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;

}

/// Open a port for a driver.
#[cfg(feature = "native")]
pub fn open_port(config: &SerialConfig) -> Result<Box<dyn Port>> {
    Ok(Box::new(native::NativePort::open(config)?))
}

/// Open a port for a driver (unavailable without the `native` feature).
#[cfg(not(feature = "native"))]
pub fn open_port(config: &SerialConfig) -> Result<Box<dyn Port>> {
    Err(crate::Error::Unsupported(format!(
        "Cannot open {}: serial support requires the `native` feature",
        config.port_name
    )))
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
