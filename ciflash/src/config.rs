//! Flashing parameters.
//!
//! [`FlashConfig::default`] matches the known-good setup for a Unit-ASR
//! module behind an ESP32-S3 running the UART passthrough sketch.

use crate::port::SerialConfig;
use crate::response::POLL_INTERVAL;
use std::path::PathBuf;
use std::time::Duration;

/// Default firmware location, relative to the working directory.
pub const DEFAULT_FIRMWARE: &str = "unitASRfirmware/jx_firm/jx_ci_03t_firmware.bin";

/// Bytes written per chunk.
pub const CHUNK_SIZE: usize = 256;

/// Progress is reported every time this many bytes have been sent.
pub const PROGRESS_INTERVAL: usize = 10 * 1024;

/// Candidate bootloader-entry frames, sent in order.
pub const BOOTLOADER_FRAMES: [&[u8]; 3] = [
    &[0xAA, 0x55, 0x50, 0x55, 0xAA],
    &[0xAA, 0x55, 0x51, 0x55, 0xAA],
    &[0x7E, 0x00, 0x04, 0x00],
];

/// Wake frame sent after the device restarts.
pub const PROBE_FRAME: &[u8] = &[0xAA, 0x55, 0xFF, 0x55, 0xAA];

/// Every delay and response window used during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Pause after opening the port, before clearing buffers.
    pub open_settle: Duration,
    /// Pause after each bootloader frame.
    pub command_gap: Duration,
    /// Response window after each bootloader frame.
    pub command_window: Duration,
    /// Break duration.
    pub break_duration: Duration,
    /// Pause after the break.
    pub break_pause: Duration,
    /// Pause between DTR/RTS transitions.
    pub line_pause: Duration,
    /// Pause before the final bootloader response window.
    pub final_pause: Duration,
    /// Final bootloader response window.
    pub final_window: Duration,
    /// Pause after each firmware chunk.
    pub chunk_pacing: Duration,
    /// Wait for the device to process the image and restart.
    pub restart_settle: Duration,
    /// Pause between writing the probe and listening.
    pub probe_delay: Duration,
    /// Probe response window.
    pub probe_window: Duration,
    /// Poll interval of the response collector.
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            open_settle: Duration::from_secs(1),
            command_gap: Duration::from_millis(300),
            command_window: Duration::from_secs(1),
            break_duration: Duration::from_millis(250),
            break_pause: Duration::from_millis(500),
            line_pause: Duration::from_millis(100),
            final_pause: Duration::from_millis(500),
            final_window: Duration::from_secs(2),
            chunk_pacing: Duration::from_millis(5),
            restart_settle: Duration::from_secs(10),
            probe_delay: Duration::from_secs(1),
            probe_window: Duration::from_secs(2),
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl Timing {
    /// No delays and 20 ms response windows, for driving a mock transport.
    pub fn immediate() -> Self {
        let window = Duration::from_millis(20);
        Self {
            open_settle: Duration::ZERO,
            command_gap: Duration::ZERO,
            command_window: window,
            break_duration: Duration::ZERO,
            break_pause: Duration::ZERO,
            line_pause: Duration::ZERO,
            final_pause: Duration::ZERO,
            final_window: window,
            chunk_pacing: Duration::ZERO,
            restart_settle: Duration::ZERO,
            probe_delay: Duration::ZERO,
            probe_window: window,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Complete configuration of one flashing run.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// Serial connection settings.
    pub serial: SerialConfig,
    /// Firmware file.
    pub firmware: PathBuf,
    /// Bytes per write.
    pub chunk_size: usize,
    /// Progress reporting granularity in bytes.
    pub progress_interval: usize,
    /// Bootloader-entry frames.
    pub bootloader_frames: Vec<Vec<u8>>,
    /// Post-restart wake frame.
    pub probe_frame: Vec<u8>,
    /// Delays and windows.
    pub timing: Timing,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            firmware: PathBuf::from(DEFAULT_FIRMWARE),
            chunk_size: CHUNK_SIZE,
            progress_interval: PROGRESS_INTERVAL,
            bootloader_frames: BOOTLOADER_FRAMES.iter().map(|f| f.to_vec()).collect(),
            probe_frame: PROBE_FRAME.to_vec(),
            timing: Timing::default(),
        }
    }
}

impl FlashConfig {
    /// Override the serial port name.
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.serial.port_name = port.into();
        self
    }

    /// Override the baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.serial.baud_rate = baud;
        self
    }

    /// Override the firmware path.
    #[must_use]
    pub fn with_firmware(mut self, firmware: impl Into<PathBuf>) -> Self {
        self.firmware = firmware.into();
        self
    }

    /// Override the timing table.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}
