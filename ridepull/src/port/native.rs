//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::Result,
        port::{
            DataBits, FlowControl, Parity, Port, PortEnumerator, PortInfo, PortScan, SerialConfig,
            StopBits,
        },
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::io::{Read, Write},
};

/// Hint appended to enumeration warnings.
const DRIVER_HINT: &str =
    "You may need to (re)install the USB-serial (FTDI, CH340, CP210x) drivers before downloading.";

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
        })
    }
}

impl Port for NativePort {
    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        if let Some(ref mut p) = self.port {
            p.write_data_terminal_ready(level)?;
        }
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        if let Some(ref mut p) = self.port {
            p.write_request_to_send(level)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.port.take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

/// Native port enumerator.
///
/// Lists what the OS reports, followed by any extra paths the user
/// configured explicitly. Extra paths are listed even when the OS query
/// fails, so a scan can partially succeed.
#[derive(Debug, Clone, Default)]
pub struct NativePortEnumerator {
    extra: Vec<String>,
}

impl NativePortEnumerator {
    /// Create an enumerator that lists only OS-reported ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always list these paths in addition to the OS-reported ports.
    #[must_use]
    pub fn with_extra_ports<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra
            .extend(extra.into_iter().map(Into::into));
        self
    }
}

impl PortEnumerator for NativePortEnumerator {
    fn scan(&self) -> PortScan {
        let mut scan = match serialport::available_ports() {
            Ok(ports) => PortScan::new(
                ports
                    .into_iter()
                    .map(PortInfo::from)
                    .collect(),
            ),
            Err(e) => {
                debug!("Failed to enumerate serial ports: {e}");
                PortScan::default().with_warning(format!("{e}\n\n{DRIVER_HINT}"))
            },
        };

        for name in &self.extra {
            if scan.position(name).is_none() {
                trace!("Adding configured port {name}");
                scan.ports.push(PortInfo::from_name(name.clone()));
            }
        }

        scan
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let port = Self::from_name(info.port_name);
        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X})",
                    port.name, usb.vid, usb.pid
                );
                Self {
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                    serial_number: usb.serial_number,
                    ..port.with_usb(usb.vid, usb.pid)
                }
            },
            _ => port,
        }
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
