//! Raw serial capture.
//!
//! Records whatever the device streams after it is told to dump its memory
//! (usually a button on the unit), until the line goes quiet.

use super::{
    DeviceDriver, DriverSettings, Downloaded, check_progress, keep_temp, prepare_port,
    release_port, temp_file_in, timestamped_name,
};
use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, open_port};
use log::{debug, info, trace};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Instant;

/// Captures the raw byte stream of a port into a file.
#[derive(Debug, Clone, Default)]
pub struct SerialCaptureDriver {
    settings: DriverSettings,
}

impl SerialCaptureDriver {
    /// Create a capture driver with the given serial settings.
    pub fn new(settings: DriverSettings) -> Self {
        Self { settings }
    }
}

impl DeviceDriver for SerialCaptureDriver {
    fn name(&self) -> &str {
        "Serial Capture"
    }

    fn download(
        &self,
        port: &PortInfo,
        dest_dir: &Path,
        on_progress: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Downloaded> {
        check_progress(on_progress, &format!("Opening {}...", port.name))?;
        let mut serial = open_port(&self.settings.serial_config(port))?;
        prepare_port(serial.as_mut(), &self.settings)?;

        // Dropped (and deleted) on any early return.
        let mut temp = temp_file_in(dest_dir)?;
        let result = capture(serial.as_mut(), temp.as_file_mut(), &self.settings, on_progress);

        release_port(serial.as_mut());

        let bytes = result?;
        let temp_path = keep_temp(temp)?;
        info!("Captured {bytes} bytes from {}", port.name);

        Ok(Downloaded {
            temp_path,
            file_name: timestamped_name("capture", "raw"),
        })
    }
}

/// Copy bytes from `port` into `sink` until the line has been idle for
/// `settings.idle_timeout`.
///
/// Fails with [`Error::Timeout`] if nothing arrives within
/// `settings.start_timeout`. Returns the number of bytes captured.
pub fn capture<P, W>(
    port: &mut P,
    sink: &mut W,
    settings: &DriverSettings,
    on_progress: &mut dyn FnMut(&str) -> bool,
) -> Result<u64>
where
    P: Port + ?Sized,
    W: Write,
{
    let started = Instant::now();
    let mut last_data = started;
    let mut total: u64 = 0;
    let mut buf = [0u8; 4096];

    debug!("Waiting for data on {}", port.name());

    loop {
        let status = if total == 0 {
            "Waiting for device to send data...".to_string()
        } else {
            format!("Read {total} bytes")
        };
        check_progress(on_progress, &status)?;

        match port.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => {
                trace!("Read {n} bytes");
                sink.write_all(&buf[..n])?;
                total += n as u64;
                last_data = Instant::now();
                continue;
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {},
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }

        if total == 0 {
            if started.elapsed() >= settings.start_timeout {
                return Err(Error::Timeout(format!(
                    "No data received from {} within {} seconds",
                    port.name(),
                    settings.start_timeout.as_secs()
                )));
            }
        } else if last_data.elapsed() >= settings.idle_timeout {
            break;
        }
    }

    sink.flush()?;
    debug!("Line idle, capture complete ({total} bytes)");
    Ok(total)
}
