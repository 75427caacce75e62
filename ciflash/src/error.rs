//! Error types for ciflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for ciflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ciflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Firmware file does not exist or is not a regular file.
    #[error("Firmware file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The serial port could not be opened.
    #[error("Failed to open serial port {port}: {source}")]
    PortUnavailable {
        /// Port name/path that was requested.
        port: String,
        /// Underlying transport error.
        source: Box<Error>,
    },

    /// The operation was cancelled by the user.
    #[error("Interrupted by user")]
    Interrupted,

    /// Operation not supported by the underlying transport.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Wrap an open failure for `port`.
    pub fn port_unavailable(port: impl Into<String>, source: impl Into<Error>) -> Self {
        Self::PortUnavailable {
            port: port.into(),
            source: Box::new(source.into()),
        }
    }

    /// Whether this error was caused by a user interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted => true,
            Self::Io(e) => e.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}
