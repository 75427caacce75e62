//! # ciflash
//!
//! A library for pushing firmware to Chipintelli CI-03T voice modules
//! (M5Stack Unit-ASR) through a UART passthrough bridge.
//!
//! The module exposes no documented flashing protocol, so the procedure is
//! best-effort:
//!
//! - guessed bootloader-entry frames, a break and a DTR/RTS toggle
//! - the raw image streamed in paced 256-byte chunks
//! - a settle period, then a wake probe whose reply length decides the outcome
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use ciflash::{FlashConfig, Flasher, TransferOutcome};
//!
//! fn main() {
//!     let config = FlashConfig::default().with_port("/dev/ttyACM0");
//!     let flasher = Flasher::new(config);
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let result = flasher.run_native(|event| println!("{event:?}"));
//!         std::process::exit(TransferOutcome::from_result(&result).exit_code());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

pub mod bootloader;
pub mod config;
pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod response;
pub mod stream;
pub mod verify;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Longest uninterrupted slice of a [`pause`].
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `duration`, returning [`Error::Interrupted`] as soon as
/// `interrupted` reports `true`.
pub(crate) fn pause(duration: Duration, interrupted: &dyn Fn() -> bool) -> Result<()> {
    let deadline = Instant::now() + duration;
    loop {
        if interrupted() {
            return Err(Error::Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    bootloader::BootloaderReport,
    config::{FlashConfig, Timing},
    error::{Error, Result},
    flasher::{FlashEvent, FlashReport, Flasher, Stage},
    image::FirmwareImage,
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    response::{collect_response, to_hex},
    stream::StreamStats,
    verify::TransferOutcome,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_pause_sleeps_full_duration() {
        let start = Instant::now();
        pause(Duration::from_millis(60), &|| false).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_pause_stops_on_interrupt() {
        let start = Instant::now();
        let result = pause(Duration::from_secs(10), &|| true);
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
