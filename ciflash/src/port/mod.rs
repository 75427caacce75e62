//! Port abstraction for serial communication with the passthrough bridge.
//!
//! The flashing sequence never talks to `serialport` directly. Everything goes
//! through the [`Port`] trait so the whole run can be driven against a mock
//! transport in tests.
//!
//! ```text
//! +------------------------------+
//! |  Flasher (bootloader, stream,|
//! |  verify, response collector) |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |          Port trait          |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |  NativePort (serialport)     |
//! +------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ciflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> ciflash::Result<()> {
//!     port.write_all_bytes(&[0xAA, 0x55, 0xFF, 0x55, 0xAA])?;
//!     println!("{} bytes waiting", port.bytes_to_read()?);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the passthrough bridge.
pub const DEFAULT_BAUD: u32 = 115200;

/// Default read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::from("/dev/ttyACM0"),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
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

}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Unified port trait for serial communication.
///
/// Break and control-line operations may legitimately fail on bridges that
/// do not wire them through; callers decide whether that matters.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Number of bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> Result<usize>;

    /// Discard pending input.
    fn clear_input(&mut self) -> Result<()>;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Start a break condition on the TX line.
    fn set_break(&mut self) -> Result<()>;

    /// End the break condition.
    fn clear_break(&mut self) -> Result<()>;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
