//! Transfer orchestrator.
//!
//! One linear pass per run:
//!
//! ```text
//! Idle -> PortOpen -> BootloaderAttempted -> Streaming -> Settling -> Probing
//!      -> { Success | Uncertain | Failure }
//! ```
//!
//! Nothing loops back. The firmware is loaded before the port is touched, and
//! once opened the port is closed exactly once, whatever happens afterwards.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ciflash::{FlashConfig, FlashEvent, Flasher, NativePort};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let flasher = Flasher::new(FlashConfig::default());
//!     let report = flasher.run(NativePort::open, |event| {
//!         if let FlashEvent::Progress { sent, total } = event {
//!             println!("{sent}/{total}");
//!         }
//!     })?;
//!     println!("Outcome: {}", report.outcome);
//!     Ok(())
//! }
//! ```

use crate::bootloader::{BootloaderReport, enter_bootloader};
use crate::config::FlashConfig;
use crate::error::Result;
use crate::image::FirmwareImage;
use crate::port::{Port, SerialConfig};
use crate::stream::{StreamOptions, StreamStats, stream_firmware};
use crate::verify::{TransferOutcome, await_restart, classify, probe_device};
use crate::{is_interrupted_requested, pause};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing done yet.
    Idle,
    /// Port opened and buffers cleared.
    PortOpen,
    /// Bootloader heuristic finished.
    BootloaderAttempted,
    /// Firmware going out.
    Streaming,
    /// Waiting for the device to restart.
    Settling,
    /// Wake probe sent, listening.
    Probing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::PortOpen => "port open",
            Self::BootloaderAttempted => "bootloader attempted",
            Self::Streaming => "streaming",
            Self::Settling => "settling",
            Self::Probing => "probing",
        };
        f.write_str(s)
    }
}

/// Notifications emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent<'a> {
    /// Entered a new phase.
    Stage(Stage),
    /// The serial port is open.
    PortOpened {
        /// Port name/path.
        port: &'a str,
        /// Baud rate.
        baud: u32,
    },
    /// The device answered during bootloader entry.
    ///
    /// `frame` is the index of the candidate frame, or `None` for the final
    /// listening window.
    BootloaderReply {
        /// Candidate frame index.
        frame: Option<usize>,
        /// Raw reply.
        reply: &'a [u8],
    },
    /// Cumulative bytes sent.
    Progress {
        /// Bytes sent so far.
        sent: usize,
        /// Image size.
        total: usize,
    },
    /// Every chunk has been written.
    StreamComplete(StreamStats),
    /// Reply to the wake probe (possibly empty).
    ProbeReply(&'a [u8]),
    /// The serial port was released.
    PortClosed,
}

/// Summary of a run that got as far as the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    /// Classified result.
    pub outcome: TransferOutcome,
    /// Image size in bytes.
    pub firmware_len: usize,
    /// What went over the wire.
    pub stream: StreamStats,
    /// Replies seen during bootloader entry.
    pub bootloader: BootloaderReport,
    /// Reply to the wake probe.
    pub probe_reply: Vec<u8>,
}

impl TransferOutcome {
    /// Outcome of a finished run; any error is a failure.
    pub fn from_result(result: &Result<FlashReport>) -> Self {
        match result {
            Ok(report) => report.outcome,
            Err(_) => Self::Failure,
        }
    }
}

type InterruptChecker = Arc<dyn Fn() -> bool + Send + Sync>;

/// Drives one flashing run.
pub struct Flasher {
    config: FlashConfig,
    interrupted: InterruptChecker,
}

impl Flasher {
    /// Create a flasher that honours the global interrupt checker.
    pub fn new(config: FlashConfig) -> Self {
        Self {
            config,
            interrupted: Arc::new(is_interrupted_requested),
        }
    }

    /// Use `checker` instead of the global interrupt checker.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupted = Arc::new(checker);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Load the configured firmware file.
    pub fn load_firmware(&self) -> Result<FirmwareImage> {
        let image = FirmwareImage::from_file(&self.config.firmware)?;
        info!(
            "Loaded firmware: {} ({} bytes, {:.1} KB)",
            image.name(),
            image.len(),
            image.size_kib()
        );
        Ok(image)
    }

    /// Load the firmware, then open the port with `open` and flash.
    ///
    /// A missing firmware file fails before `open` is called.
    pub fn run<P, O, F>(&self, open: O, on_event: F) -> Result<FlashReport>
    where
        P: Port,
        O: FnOnce(&SerialConfig) -> Result<P>,
        F: FnMut(FlashEvent<'_>),
    {
        let image = self.load_firmware()?;
        self.run_image(&image, open, on_event)
    }

    /// Flash an already loaded image.
    pub fn run_image<P, O, F>(
        &self,
        image: &FirmwareImage,
        open: O,
        mut on_event: F,
    ) -> Result<FlashReport>
    where
        P: Port,
        O: FnOnce(&SerialConfig) -> Result<P>,
        F: FnMut(FlashEvent<'_>),
    {
        on_event(FlashEvent::Stage(Stage::Idle));

        let serial = &self.config.serial;
        let mut port = open(serial)?;
        info!(
            "Opened serial port: {} @ {} baud",
            port.name(),
            port.baud_rate()
        );
        on_event(FlashEvent::PortOpened {
            port: port.name(),
            baud: port.baud_rate(),
        });

        let result = self.transfer(&mut port, image, &mut on_event);

        if let Err(e) = port.close() {
            warn!("Failed to close serial port: {e}");
        }
        debug!("Serial port closed");
        on_event(FlashEvent::PortClosed);

        match &result {
            Ok(report) => info!("Flash outcome: {}", report.outcome),
            Err(e) if e.is_interrupted() => warn!("Flashing interrupted, device state unknown"),
            Err(e) => warn!("Flashing failed: {e}"),
        }
        result
    }

    fn transfer<P, F>(
        &self,
        port: &mut P,
        image: &FirmwareImage,
        on_event: &mut F,
    ) -> Result<FlashReport>
    where
        P: Port,
        F: FnMut(FlashEvent<'_>),
    {
        let config = &self.config;
        let timing = &config.timing;
        let interrupted = self.interrupted.as_ref();

        pause(timing.open_settle, interrupted)?;
        port.clear_buffers()?;
        self.enter(Stage::PortOpen, on_event);

        let bootloader = enter_bootloader(
            port,
            &config.bootloader_frames,
            timing,
            interrupted,
            |frame, reply| on_event(FlashEvent::BootloaderReply { frame, reply }),
        )?;
        if !bootloader.any_reply() {
            debug!("Bootloader entry unclear, continuing anyway");
        }
        self.enter(Stage::BootloaderAttempted, on_event);

        self.enter(Stage::Streaming, on_event);
        info!("Flashing firmware ({} bytes)...", image.len());
        let options = StreamOptions {
            chunk_size: config.chunk_size,
            progress_interval: config.progress_interval,
            pacing: timing.chunk_pacing,
        };
        let stream = stream_firmware(port, image.data(), options, interrupted, |sent, total| {
            on_event(FlashEvent::Progress { sent, total });
        })?;
        info!("Firmware sent ({} bytes)", stream.bytes);
        on_event(FlashEvent::StreamComplete(stream));

        self.enter(Stage::Settling, on_event);
        await_restart(timing, interrupted)?;

        self.enter(Stage::Probing, on_event);
        let probe_reply = probe_device(port, &config.probe_frame, timing, interrupted)?;
        on_event(FlashEvent::ProbeReply(&probe_reply));

        Ok(FlashReport {
            outcome: classify(&probe_reply),
            firmware_len: image.len(),
            stream,
            bootloader,
            probe_reply,
        })
    }

    fn enter<F: FnMut(FlashEvent<'_>)>(&self, stage: Stage, on_event: &mut F) {
        debug!("Stage: {stage}");
        on_event(FlashEvent::Stage(stage));
    }
}

#[cfg(feature = "native")]
impl Flasher {
    /// Run against the configured native serial port.
    pub fn run_native<F>(&self, on_event: F) -> Result<FlashReport>
    where
        F: FnMut(FlashEvent<'_>),
    {
        self.run(crate::port::NativePort::open, on_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BOOTLOADER_FRAMES, PROBE_FRAME, Timing};
    use crate::error::Error;
    use crate::port::mock::{Event, MockPort};
    use std::cell::Cell;
    use std::io::{Read as _, Write as _};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn firmware_file(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        (file, data)
    }

    fn flasher_for(path: &std::path::Path) -> Flasher {
        let config = FlashConfig::default()
            .with_firmware(path)
            .with_timing(Timing::immediate());
        Flasher::new(config).with_interrupt_checker(|| false)
    }

    #[test]
    fn test_happy_path_with_ack_is_success() {
        let (file, _) = firmware_file(3000);
        let port = MockPort::new().reply_to(PROBE_FRAME, &[0xAA, 0x55, 0x01, 0x55, 0xAA]);
        let closes = Arc::clone(&port.closes);

        let result = flasher_for(file.path()).run(|_| Ok(port), |_| {});
        let report = result.as_ref().unwrap();

        assert_eq!(report.outcome, TransferOutcome::Success);
        assert_eq!(report.firmware_len, 3000);
        assert_eq!(report.stream.chunks, 12);
        assert_eq!(report.probe_reply.len(), 5);
        assert_eq!(TransferOutcome::from_result(&result), TransferOutcome::Success);
        assert_eq!(TransferOutcome::from_result(&result).exit_code(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wire_sequence() {
        let (file, data) = firmware_file(600);
        let mut port = MockPort::new().reply_to(PROBE_FRAME, &[0; 6]);
        let flasher = flasher_for(file.path());
        let image = flasher.load_firmware().unwrap();

        let port_ref = &mut port;
        let report = flasher
            .run_image(&image, |_| Ok(PortHandle(port_ref)), |_| {})
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::Success);

        let mut expected = vec![Event::ClearBuffers];
        expected.extend(BOOTLOADER_FRAMES.iter().map(|f| Event::Write(f.to_vec())));
        expected.extend([
            Event::Break(true),
            Event::Break(false),
            Event::Dtr(false),
            Event::Rts(true),
            Event::Rts(false),
            Event::Dtr(true),
        ]);
        expected.extend(data.chunks(256).map(|c| Event::Write(c.to_vec())));
        expected.extend([
            Event::ClearInput,
            Event::Write(PROBE_FRAME.to_vec()),
            Event::Close,
        ]);
        assert_eq!(port.events, expected);
    }

    #[test]
    fn test_silent_device_is_uncertain() {
        let (file, _) = firmware_file(1024);
        let port = MockPort::new();
        let closes = Arc::clone(&port.closes);

        let result = flasher_for(file.path()).run(|_| Ok(port), |_| {});
        let report = result.as_ref().unwrap();

        assert_eq!(report.outcome, TransferOutcome::Uncertain);
        assert!(report.probe_reply.is_empty());
        assert_eq!(TransferOutcome::from_result(&result).exit_code(), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_odd_length_reply_is_uncertain() {
        let (file, _) = firmware_file(512);
        let port = MockPort::new().reply_to(PROBE_FRAME, b"READY\r\n\0");

        let report = flasher_for(file.path())
            .run(|_| Ok(port), |_| {})
            .unwrap();

        assert_eq!(report.outcome, TransferOutcome::Uncertain);
        assert_eq!(report.probe_reply, b"READY\r\n\0");
    }

    #[test]
    fn test_missing_firmware_never_opens_port() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Cell::new(false);

        let result = flasher_for(&dir.path().join("missing.bin")).run(
            |_| {
                opened.set(true);
                Ok(MockPort::new())
            },
            |_| {},
        );

        assert!(matches!(result, Err(Error::FileNotFound(_))));
        assert!(!opened.get());
        assert_eq!(TransferOutcome::from_result(&result).exit_code(), 1);
    }

    #[test]
    fn test_port_open_failure_after_loading() {
        let (file, _) = firmware_file(256);
        let mut events = Vec::new();

        let result = flasher_for(file.path()).run(
            |serial: &SerialConfig| -> Result<MockPort> {
                Err(Error::port_unavailable(
                    serial.port_name.clone(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
                ))
            },
            |event| events.push(format!("{event:?}")),
        );

        assert!(matches!(result, Err(Error::PortUnavailable { .. })));
        assert_eq!(TransferOutcome::from_result(&result).exit_code(), 1);
        assert!(!events.iter().any(|e| e.starts_with("Progress")));
    }

    #[test]
    fn test_interrupt_mid_stream_closes_once() {
        let (file, _) = firmware_file(8 * 256);
        let flag = Arc::new(AtomicBool::new(false));
        let mut port = MockPort::new();
        let closes = Arc::clone(&port.closes);
        let hook_flag = Arc::clone(&flag);
        // Three bootloader frames, then two firmware chunks.
        port.on_write = Some(Box::new(move |n| {
            if n == 5 {
                hook_flag.store(true, Ordering::SeqCst);
            }
        }));

        let checker = Arc::clone(&flag);
        let flasher = flasher_for(file.path())
            .with_interrupt_checker(move || checker.load(Ordering::SeqCst));
        let mut progress = Vec::new();
        let mut closed_events = 0;

        let result = flasher.run(
            |_| Ok(port),
            |event| match event {
                FlashEvent::Progress { sent, .. } => progress.push(sent),
                FlashEvent::PortClosed => closed_events += 1,
                _ => {},
            },
        );

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(closed_events, 1);
        assert!(progress.is_empty());
        assert_eq!(TransferOutcome::from_result(&result).exit_code(), 1);
    }

    #[test]
    fn test_write_failure_mid_stream_closes_port() {
        let (file, _) = firmware_file(4 * 256);
        let mut port = MockPort::new();
        let closes = Arc::clone(&port.closes);
        port.fail_writes_after = Some(4);

        let result = flasher_for(file.path()).run(|_| Ok(port), |_| {});

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stage_order() {
        let (file, _) = firmware_file(300);
        let mut stages = Vec::new();

        flasher_for(file.path())
            .run(
                |_| Ok(MockPort::new().reply_to(PROBE_FRAME, &[0; 5])),
                |event| {
                    if let FlashEvent::Stage(stage) = event {
                        stages.push(stage);
                    }
                },
            )
            .unwrap();

        assert_eq!(
            stages,
            vec![
                Stage::Idle,
                Stage::PortOpen,
                Stage::BootloaderAttempted,
                Stage::Streaming,
                Stage::Settling,
                Stage::Probing,
            ]
        );
    }

    #[test]
    fn test_probing_stage_precedes_wake_frame() {
        let (file, _) = firmware_file(300);
        let written = Arc::new(AtomicUsize::new(0));
        let mut port = MockPort::new().reply_to(PROBE_FRAME, &[0; 5]);
        let counter = Arc::clone(&written);
        port.on_write = Some(Box::new(move |n| counter.store(n, Ordering::SeqCst)));

        let mut seen = Vec::new();
        flasher_for(file.path())
            .run(
                |_| Ok(port),
                |event| match event {
                    FlashEvent::Stage(stage @ (Stage::Settling | Stage::Probing)) => {
                        seen.push((format!("{stage}"), written.load(Ordering::SeqCst)));
                    },
                    FlashEvent::ProbeReply(_) => {
                        seen.push(("reply".to_string(), written.load(Ordering::SeqCst)));
                    },
                    _ => {},
                },
            )
            .unwrap();

        // Three bootloader frames and two chunks before settling; the wake
        // frame goes out only after Probing is announced.
        assert_eq!(
            seen,
            vec![
                ("settling".to_string(), 5),
                ("probing".to_string(), 5),
                ("reply".to_string(), 6),
            ]
        );
    }

    #[test]
    fn test_stuck_break_aborts_before_streaming() {
        let (file, _) = firmware_file(1024);
        let mut port = MockPort::new();
        port.clear_break_failures = 2;
        let closes = Arc::clone(&port.closes);
        let mut progress = 0;

        let result = flasher_for(file.path()).run(
            |_| Ok(port),
            |event| {
                if let FlashEvent::Progress { .. } = event {
                    progress += 1;
                }
            },
        );

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(progress, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(TransferOutcome::from_result(&result).exit_code(), 1);
    }

    #[test]
    fn test_progress_reaches_total() {
        let (file, _) = firmware_file(25 * 1024);
        let mut progress = Vec::new();

        flasher_for(file.path())
            .run(
                |_| Ok(MockPort::new()),
                |event| {
                    if let FlashEvent::Progress { sent, total } = event {
                        progress.push((sent, total));
                    }
                },
            )
            .unwrap();

        assert_eq!(
            progress,
            vec![(10240, 25600), (20480, 25600), (25600, 25600)]
        );
    }

    /// Borrowing wrapper so a test can inspect the mock after the run.
    struct PortHandle<'a>(&'a mut MockPort);

    impl std::io::Read for PortHandle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl std::io::Write for PortHandle<'_> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.0.flush()
        }
    }

    impl Port for PortHandle<'_> {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn baud_rate(&self) -> u32 {
            self.0.baud_rate()
        }

        fn bytes_to_read(&mut self) -> Result<usize> {
            self.0.bytes_to_read()
        }

        fn clear_input(&mut self) -> Result<()> {
            self.0.clear_input()
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.0.clear_buffers()
        }

        fn set_break(&mut self) -> Result<()> {
            self.0.set_break()
        }

        fn clear_break(&mut self) -> Result<()> {
            self.0.clear_break()
        }

        fn set_dtr(&mut self, level: bool) -> Result<()> {
            self.0.set_dtr(level)
        }

        fn set_rts(&mut self, level: bool) -> Result<()> {
            self.0.set_rts(level)
        }

        fn close(&mut self) -> Result<()> {
            self.0.close()
        }
    }
}
