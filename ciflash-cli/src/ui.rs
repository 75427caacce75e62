//! Operator console: banners, hints and the transfer progress bar.
//!
//! Everything here goes to stderr. The person running this is standing next
//! to the hardware, so the wording favours what to do next over detail.

use ciflash::{
    FlashEvent, FlashReport, NativePortEnumerator, PortEnumerator, Stage, TransferOutcome, to_hex,
};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const RULE_WIDTH: usize = 60;

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Safety notes shown before the countdown.
pub(crate) fn print_preflight() {
    eprintln!();
    eprintln!("{} {}", style("⚠").yellow(), style("IMPORTANT:").bold());
    eprintln!("  1. Make sure the UART_Passthrough sketch is on the ESP32-S3");
    eprintln!("  2. Close any serial monitor using the port");
    eprintln!("  3. Do NOT disconnect power during flashing");
    eprintln!();
}

/// Title banner.
pub(crate) fn print_header() {
    eprintln!("{}", rule());
    eprintln!("  {}", style("Chipintelli CI-03T Firmware Flasher").bold());
    eprintln!("  M5Stack Unit-ASR");
    eprintln!("{}", rule());
    eprintln!();
}

/// Renders [`FlashEvent`]s as they arrive.
pub(crate) struct Console {
    quiet: bool,
    fancy: bool,
    restart_settle: Duration,
    bar: Option<ProgressBar>,
}

impl Console {
    pub(crate) fn new(quiet: bool, fancy: bool, restart_settle: Duration) -> Self {
        Self {
            quiet,
            fancy,
            restart_settle,
            bar: None,
        }
    }

    pub(crate) fn handle(&mut self, event: FlashEvent<'_>) {
        match event {
            FlashEvent::PortOpened { port, baud } => {
                self.say(&format!(
                    "{} Opened serial port: {} @ {} baud",
                    style("✓").green(),
                    style(port).cyan(),
                    baud
                ));
            },
            FlashEvent::Stage(Stage::PortOpen) => {
                self.say("Attempting to enter bootloader mode...");
            },
            FlashEvent::BootloaderReply { frame, reply } => {
                let label = match frame {
                    Some(_) => "Response to bootloader command",
                    None => "Bootloader response",
                };
                self.say(&format!("  {label}: {}", to_hex(reply)));
            },
            FlashEvent::Stage(Stage::Streaming) => {
                self.say("");
                self.say("Flashing firmware...");
                self.say(&format!(
                    "{} This may take 2-3 minutes. Do NOT disconnect power!",
                    style("⚠").yellow()
                ));
                self.say("");
            },
            FlashEvent::Progress { sent, total } => self.progress(sent, total),
            FlashEvent::StreamComplete(_) => {
                if let Some(bar) = self.bar.take() {
                    bar.finish();
                }
                self.say("");
                self.say(&format!("{} Firmware sent successfully!", style("✓").green()));
                self.say("");
            },
            FlashEvent::Stage(Stage::Settling) => {
                self.say(&restart_message(self.restart_settle));
            },
            FlashEvent::Stage(Stage::Probing) => {
                self.say("Testing device response...");
            },
            FlashEvent::PortClosed => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon();
                }
                self.say("");
                self.say("Serial port closed");
            },
            FlashEvent::Stage(Stage::Idle | Stage::BootloaderAttempted)
            | FlashEvent::ProbeReply(_) => {},
        }
    }

    fn progress(&mut self, sent: usize, total: usize) {
        if self.quiet {
            return;
        }
        if !self.fancy {
            let percent = if total == 0 { 100 } else { sent * 100 / total };
            eprintln!("Progress: {percent}% ({sent}/{total} bytes)");
            return;
        }

        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("Progress: |{bar:50}| {percent}% ({pos}/{len} bytes)")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▌-"),
            );
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar
        });
        bar.set_position(sent as u64);
    }

    fn say(&self, line: &str) {
        if !self.quiet {
            eprintln!("{line}");
        }
    }
}

fn restart_message(settle: Duration) -> String {
    format!("Waiting for device to restart ({} seconds)...", settle.as_secs())
}

/// Outcome banner for a run that reached the probe.
pub(crate) fn print_report(report: &FlashReport) {
    if report.outcome == TransferOutcome::Success {
        eprintln!(
            "{} Device responded: {}",
            style("✓").green(),
            to_hex(&report.probe_reply)
        );
        eprintln!();
        eprintln!("{}", rule());
        eprintln!("  {}", style("✓ FLASHING SUCCESSFUL!").green().bold());
        eprintln!("{}", rule());
        eprintln!();
        eprintln!("Next steps:");
        eprintln!("  1. Upload the 'UnitASR_Firmware_Check' sketch to the ESP32");
        eprintln!("  2. Open the serial monitor");
        eprintln!("  3. Say 'Hi M Five' to test voice recognition!");
    } else if report.probe_reply.is_empty() {
        eprintln!("{} No response from device", style("⚠").yellow());
        print_uncertain_hints();
    } else {
        eprintln!(
            "{} Device responded: {}",
            style("⚠").yellow(),
            to_hex(&report.probe_reply)
        );
        eprintln!(
            "  Reply is {} bytes, expected a 5 or 6 byte acknowledgment",
            report.probe_reply.len()
        );
        print_uncertain_hints();
    }
    eprintln!();
}

fn print_uncertain_hints() {
    eprintln!();
    eprintln!("This could mean:");
    eprintln!("  - Device is still flashing (needs more time)");
    eprintln!("  - Device needs a manual reset");
    eprintln!("  - Flashing failed");
    eprintln!();
    eprintln!("Try:");
    eprintln!("  1. Power cycle the Unit-ASR");
    eprintln!("  2. Upload a test sketch and check the serial monitor");
}

/// Hints after the port could not be opened.
pub(crate) fn print_port_hints() {
    eprintln!("  Make sure:");
    eprintln!("  1. The ESP32-S3 has the UART_Passthrough sketch uploaded");
    eprintln!("  2. The serial monitor is closed");
    eprintln!("  3. The port is correct (use --port to choose another)");

    match NativePortEnumerator::list_ports() {
        Ok(ports) if !ports.is_empty() => {
            eprintln!();
            eprintln!("  Available ports:");
            for port in ports {
                let product = port
                    .product
                    .map(|p| format!(" - {}", style(p).dim()))
                    .unwrap_or_default();
                let vid_pid = match (port.vid, port.pid) {
                    (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
                    _ => String::new(),
                };
                eprintln!(
                    "    {} {}{}{}",
                    style("•").green(),
                    style(&port.name).cyan(),
                    vid_pid,
                    product
                );
            }
        },
        Ok(_) => eprintln!("  No serial ports detected."),
        Err(e) => log::debug!("Could not list serial ports: {e}"),
    }
}

/// Warning after Ctrl-C during the transfer.
pub(crate) fn print_interrupted() {
    eprintln!();
    eprintln!(
        "{} {}",
        style("⚠").yellow(),
        style("Flashing interrupted by user!").yellow().bold()
    );
    eprintln!("Device may be in unknown state. Try reflashing.");
}
