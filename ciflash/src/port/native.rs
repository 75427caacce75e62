//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::trace,
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::io::{self, Read, Write},
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration (8N1, no flow control).
    ///
    /// Any failure is reported as [`Error::PortUnavailable`].
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| Error::port_unavailable(&config.port_name, e))?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            baud_rate: config.baud_rate,
        })
    }

    fn inner(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Io(closed()))
    }
}

fn closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
}

/// Map a break or modem-line failure.
///
/// USB bridges without the matching ioctl surface as unknown or unsupported
/// errors; those become [`Error::Unsupported`] so callers can skip the step.
fn line_control(what: &str, result: serialport::Result<()>) -> Result<()> {
    result.map_err(|e| match e.kind() {
        serialport::ErrorKind::Unknown | serialport::ErrorKind::Io(io::ErrorKind::Unsupported) => {
            Error::Unsupported(format!("{what}: {e}"))
        },
        _ => Error::Serial(e),
    })
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        let n = self
            .inner()?
            .bytes_to_read()?;
        Ok(usize::try_from(n).unwrap_or(usize::MAX))
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inner()?
            .clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.inner()?
            .clear(ClearBuffer::All)?;
        Ok(())
    }

    fn set_break(&mut self) -> Result<()> {
        trace!("Setting break");
        line_control("break", self.inner()?.set_break())
    }

    fn clear_break(&mut self) -> Result<()> {
        trace!("Clearing break");
        line_control("break", self.inner()?.clear_break())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        line_control("DTR", self.inner()?.write_data_terminal_ready(level))
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        line_control("RTS", self.inner()?.write_request_to_send(level))
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the device.
        self.port
            .take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(closed)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(closed)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(closed)
            .and_then(std::io::Write::flush)
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, product) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        (Some(info.vid), Some(info.pid), info.product.clone())
                    },
                    _ => (None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    product,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just verifies that list_ports doesn't panic
        let _ = NativePortEnumerator::list_ports();
    }

    #[test]
    fn test_line_control_unknown_is_unsupported() {
        let err = serialport::Error::new(serialport::ErrorKind::Unknown, "ioctl failed");
        assert!(matches!(
            line_control("break", Err(err)),
            Err(Error::Unsupported(msg)) if msg.starts_with("break")
        ));

        let err = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::Unsupported),
            "not a tty",
        );
        assert!(matches!(line_control("DTR", Err(err)), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_line_control_other_errors_stay_serial() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "unplugged");
        assert!(matches!(line_control("RTS", Err(err)), Err(Error::Serial(_))));
        assert!(line_control("RTS", Ok(())).is_ok());
    }

    #[test]
    fn test_open_missing_port_is_port_unavailable() {
        let config = SerialConfig::new("/dev/ciflash-does-not-exist", 115200);
        match NativePort::open(&config) {
            Err(Error::PortUnavailable { port, .. }) => {
                assert_eq!(port, "/dev/ciflash-does-not-exist");
            },
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opening a missing device should fail"),
        }
    }
}
