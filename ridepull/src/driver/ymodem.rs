//! YMODEM export driver.

use super::{
    DeviceDriver, DriverSettings, Downloaded, check_progress, keep_temp, prepare_port,
    release_port, temp_file_in, timestamped_name,
};
use crate::error::Result;
use crate::port::{PortInfo, open_port};
use crate::protocol::ymodem::{YmodemConfig, YmodemReceiver};
use log::info;
use std::path::Path;

/// Receives a single file from a device that exports over YMODEM.
#[derive(Debug, Clone, Default)]
pub struct YmodemDriver {
    settings: DriverSettings,
}

impl YmodemDriver {
    /// Create a YMODEM driver with the given serial settings.
    pub fn new(settings: DriverSettings) -> Self {
        Self { settings }
    }
}

impl DeviceDriver for YmodemDriver {
    fn name(&self) -> &str {
        "YMODEM"
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

        let mut temp = temp_file_in(dest_dir)?;
        let config = YmodemConfig {
            start_timeout: self.settings.start_timeout,
            ..YmodemConfig::default()
        };

        let result = YmodemReceiver::with_config(serial.as_mut(), config).receive(
            temp.as_file_mut(),
            &mut |received, total| {
                let status = match (received, total) {
                    (0, _) => "Waiting for device to start sending...".to_string(),
                    (n, Some(total)) => format!("Received {n} of {total} bytes"),
                    (n, None) => format!("Received {n} bytes"),
                };
                on_progress(&status)
            },
        );

        release_port(serial.as_mut());

        let header = result?;
        let temp_path = keep_temp(temp)?;
        info!("Received {} from {}", header.name, port.name);

        Ok(Downloaded {
            temp_path,
            file_name: publishable_name(&header.name),
        })
    }
}

/// Reduce a sender-supplied name to its last path component.
fn publishable_name(sent: &str) -> String {
    sent.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map_or_else(|| timestamped_name("ymodem", "bin"), str::to_string)
}
