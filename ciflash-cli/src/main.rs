//! ciflash CLI - push firmware to a Chipintelli CI-03T (M5Stack Unit-ASR)
//! through an ESP32-S3 UART passthrough.
//!
//! Run without arguments to flash the default image on the default port,
//! after a short cancellable countdown.

use clap::Parser;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ciflash::{Error, FlashConfig, Flasher, NativePort, TransferOutcome};

mod config;
mod ui;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if the progress bar should be drawn (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// ciflash - flash a Chipintelli CI-03T over a UART passthrough bridge.
///
/// Environment variables:
///   CIFLASH_PORT       - Serial port of the bridge (default: /dev/ttyACM0)
///   CIFLASH_BAUD       - Baud rate (default: 115200)
///   CIFLASH_FIRMWARE   - Firmware image to send
#[derive(Parser, Debug)]
#[command(name = "ciflash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port of the passthrough bridge.
    #[arg(short, long, env = "CIFLASH_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, env = "CIFLASH_BAUD")]
    baud: Option<u32>,

    /// Firmware image to send.
    #[arg(short, long, env = "CIFLASH_FIRMWARE", value_name = "PATH")]
    firmware: Option<PathBuf>,

    /// Seconds to wait (cancellable with Ctrl+C) before starting. 0 skips.
    #[arg(long, default_value_t = 5, value_name = "SECS")]
    countdown: u64,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Resolve the flash configuration: CLI/env, then config file, then defaults.
    fn flash_config(&self, file: &Config) -> FlashConfig {
        let mut flash = file.apply(FlashConfig::default());
        if let Some(port) = &self.port {
            flash = flash.with_port(port.clone());
        }
        if let Some(baud) = self.baud {
            flash = flash.with_baud(baud);
        }
        if let Some(firmware) = &self.firmware {
            flash = flash.with_firmware(firmware.clone());
        }
        flash
    }
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    debug!("ciflash v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        warn!("Could not install Ctrl-C handler: {e}");
    }
    ciflash::set_interrupt_checker(was_interrupted);

    let file_config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let flash_config = cli.flash_config(&file_config);
    debug!("{flash_config:?}");

    if !cli.quiet {
        ui::print_preflight();
    }
    if !countdown(Duration::from_secs(cli.countdown), cli.quiet) {
        eprintln!();
        eprintln!("Cancelled by user");
        std::process::exit(0);
    }

    let code = flash(&cli, flash_config);
    std::process::exit(code);
}

/// Wait before starting. Returns `false` if Ctrl-C was pressed meanwhile.
fn countdown(total: Duration, quiet: bool) -> bool {
    if total.is_zero() {
        return !was_interrupted();
    }
    if !quiet {
        eprintln!(
            "Press {} within {} seconds to cancel...",
            style("Ctrl+C").bold(),
            total.as_secs()
        );
        eprintln!();
    }

    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if was_interrupted() {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
    !was_interrupted()
}

/// Run the whole transfer and return the process exit code.
fn flash(cli: &Cli, config: FlashConfig) -> i32 {
    if !cli.quiet {
        ui::print_header();
    }

    let flasher = Flasher::new(config);
    let image = match flasher.load_firmware() {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{} Error: {e}", style("✗").red());
            return TransferOutcome::Failure.exit_code();
        },
    };

    if !cli.quiet {
        eprintln!("{} Loaded firmware: {}", style("✓").green(), image.name());
        eprintln!(
            "  Size: {} bytes ({:.1} KB)",
            image.len(),
            image.size_kib()
        );
        eprintln!();
    }

    let restart_settle = flasher.config().timing.restart_settle;
    let mut console = ui::Console::new(cli.quiet, use_fancy_output(), restart_settle);
    let result = flasher.run_image(&image, NativePort::open, |event| console.handle(event));

    match &result {
        Ok(report) => ui::print_report(report),
        Err(e @ Error::PortUnavailable { .. }) => {
            eprintln!("{} {e}", style("✗").red());
            ui::print_port_hints();
        },
        Err(e) if e.is_interrupted() => ui::print_interrupted(),
        Err(e) => eprintln!("{} Flashing failed: {e}", style("✗").red()),
    }

    TransferOutcome::from_result(&result).exit_code()
}
