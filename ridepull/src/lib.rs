//! # ridepull
//!
//! A library for downloading recorded ride data from serial-attached
//! measurement devices (power meters, head units, data loggers).
//!
//! The crate provides the download workflow rather than any one device's
//! wire protocol:
//!
//! - Port discovery with non-fatal warnings ([`PortEnumerator`])
//! - A registry of pluggable device drivers ([`DeviceDriver`])
//! - A cancellable, single-session download controller ([`DownloadController`])
//! - Atomic publishing into the ride directory ([`finalize::publish`])
//!
//! Two generic drivers are built in: a raw serial capture and a YMODEM
//! receiver.
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use ridepull::{DownloadController, Host, Notice, NativePortEnumerator, driver};
//! use std::path::Path;
//!
//! struct Console;
//!
//! impl Host for Console {
//!     fn add_ride(&mut self, file_name: &str) {
//!         println!("Downloaded {file_name}");
//!     }
//!
//!     fn confirm_overwrite(&mut self, _path: &Path) -> bool {
//!         false
//!     }
//!
//!     fn notify(&mut self, notice: Notice) {
//!         eprintln!("{}: {}", notice.title, notice.message);
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = Console;
//!     let mut controller =
//!         DownloadController::new(NativePortEnumerator::new(), driver::registry(), "rides");
//!
//!     controller.rescan(&mut host);
//!     controller.select_ports(&[0])?;
//!     let published = controller.start_download(&mut host)?;
//!     println!("Saved to {}", published.path.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod device;
pub mod driver;
pub mod error;
pub mod finalize;
pub mod port;
pub mod protocol;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    controller::{
        CancelEffect, CancelHandle, ControllerState, DownloadController, Host, Notice, Published,
        Severity,
    },
    device::{DeviceKind, format_port_list},
    driver::{DeviceDriver, Downloaded, DriverRegistry, DriverSettings},
    error::{Error, Result},
    finalize::{FinalizeRequest, Overwrite},
    port::{Port, PortEnumerator, PortInfo, PortScan, SerialConfig},
};
