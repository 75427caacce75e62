//! Bootloader-entry heuristic.
//!
//! The CI-03T download mode is not documented. This module throws every
//! known nudge at the device: candidate command frames, a line break and a
//! DTR/RTS toggle. None of them is required to succeed; transport failures
//! are logged and treated as "no data". Only a user interruption or a break
//! that cannot be released stops the sequence.

use crate::config::Timing;
use crate::error::{Error, Result};
use crate::pause;
use crate::port::Port;
use crate::response::{collect_response, to_hex};
use log::{debug, info, warn};

/// What the device said (if anything) during bootloader entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootloaderReport {
    /// Reply to each candidate frame, in the order sent.
    pub frame_replies: Vec<Option<Vec<u8>>>,
    /// Whether the transport accepted the break.
    pub break_sent: bool,
    /// Whether the full DTR/RTS sequence went through.
    pub lines_toggled: bool,
    /// Reply collected at the end of the sequence.
    pub final_reply: Option<Vec<u8>>,
}

impl BootloaderReport {
    /// Whether any step drew a reply.
    pub fn any_reply(&self) -> bool {
        self.final_reply.is_some() || self.frame_replies.iter().any(Option::is_some)
    }
}

/// Run the entry heuristic.
///
/// `on_reply` is called with the frame index (or `None` for the final
/// window) and the bytes received.
pub fn enter_bootloader<P, F>(
    port: &mut P,
    frames: &[Vec<u8>],
    timing: &Timing,
    interrupted: &dyn Fn() -> bool,
    mut on_reply: F,
) -> Result<BootloaderReport>
where
    P: Port + ?Sized,
    F: FnMut(Option<usize>, &[u8]),
{
    info!("Attempting to enter bootloader mode...");
    let mut report = BootloaderReport::default();

    for (index, frame) in frames.iter().enumerate() {
        let reply = send_frame(port, frame, timing, interrupted)?;
        if let Some(bytes) = &reply {
            info!("Response to bootloader command: {}", to_hex(bytes));
            on_reply(Some(index), bytes);
        }
        report.frame_replies.push(reply);
    }

    debug!("Sending break signal");
    report.break_sent = send_break(port, timing, interrupted)?;
    pause(timing.break_pause, interrupted)?;

    report.lines_toggled =
        best_effort("DTR/RTS toggle", toggle_lines(port, timing, interrupted))?;

    pause(timing.final_pause, interrupted)?;
    let reply = collect_response(port, timing.final_window, timing.poll_interval);
    if reply.is_empty() {
        info!("No specific bootloader response (may still work)");
    } else {
        info!("Bootloader response: {}", to_hex(&reply));
        on_reply(None, &reply);
        report.final_reply = Some(reply);
    }

    Ok(report)
}

/// Write one candidate frame and listen for a reply.
fn send_frame<P: Port + ?Sized>(
    port: &mut P,
    frame: &[u8],
    timing: &Timing,
    interrupted: &dyn Fn() -> bool,
) -> Result<Option<Vec<u8>>> {
    if let Err(e) = port.write_all_bytes(frame) {
        debug!("Bootloader frame {} not sent: {e}", to_hex(frame));
        return Ok(None);
    }
    pause(timing.command_gap, interrupted)?;

    let reply = collect_response(port, timing.command_window, timing.poll_interval);
    Ok((!reply.is_empty()).then_some(reply))
}

/// Hold a break for `break_duration`.
///
/// Once the break is asserted it is always released, even on interruption.
/// A break that stays asserted after one retry is an error.
fn send_break<P: Port + ?Sized>(
    port: &mut P,
    timing: &Timing,
    interrupted: &dyn Fn() -> bool,
) -> Result<bool> {
    if let Err(e) = port.set_break() {
        return best_effort("break", Err(e));
    }
    let held = pause(timing.break_duration, interrupted);

    if let Err(e) = port.clear_break() {
        warn!("Failed to release break, retrying: {e}");
        port.clear_break()?;
    }
    held?;
    Ok(true)
}

/// DTR low, RTS pulse, DTR high. Stops at the first unsupported step.
fn toggle_lines<P: Port + ?Sized>(
    port: &mut P,
    timing: &Timing,
    interrupted: &dyn Fn() -> bool,
) -> Result<()> {
    port.set_dtr(false)?;
    port.set_rts(true)?;
    pause(timing.line_pause, interrupted)?;
    port.set_rts(false)?;
    pause(timing.line_pause, interrupted)?;
    port.set_dtr(true)?;
    Ok(())
}

/// Swallow transport failures, but never an interruption.
fn best_effort(what: &str, result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_interrupted() => Err(Error::Interrupted),
        Err(e) => {
            debug!("{what} not supported, skipping: {e}");
            Ok(false)
        },
    }
}
