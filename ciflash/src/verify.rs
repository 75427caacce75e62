//! Post-transfer liveness probe and outcome classification.

use crate::config::Timing;
use crate::error::Result;
use crate::pause;
use crate::port::Port;
use crate::response::{collect_response, to_hex};
use log::{debug, info};
use std::fmt;

/// Reply lengths the restarted firmware answers the wake frame with.
pub const ACK_LENGTHS: [usize; 2] = [5, 6];

/// Result of a flashing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The device answered the probe with an acknowledgment-sized reply.
    Success,
    /// The image went out but the device did not confirm it.
    Uncertain,
    /// The run aborted (missing file, port error, interruption, write error).
    Failure,
}

impl TransferOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Uncertain => 2,
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Uncertain => "uncertain",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Classify the probe reply.
///
/// Only a 5- or 6-byte reply counts as success. Silence and replies of any
/// other length are both uncertain: the device did something, but not what
/// a healthy restart looks like.
pub fn classify(reply: &[u8]) -> TransferOutcome {
    if ACK_LENGTHS.contains(&reply.len()) {
        TransferOutcome::Success
    } else {
        TransferOutcome::Uncertain
    }
}

/// Give the device time to restart into the new firmware.
pub fn await_restart(timing: &Timing, interrupted: &dyn Fn() -> bool) -> Result<()> {
    info!(
        "Waiting for device to restart ({} seconds)...",
        timing.restart_settle.as_secs()
    );
    pause(timing.restart_settle, interrupted)
}

/// Drop stale input, send the wake frame and collect the reply.
pub fn probe_device<P: Port + ?Sized>(
    port: &mut P,
    probe: &[u8],
    timing: &Timing,
    interrupted: &dyn Fn() -> bool,
) -> Result<Vec<u8>> {
    port.clear_input()?;

    info!("Testing device response...");
    port.write_all_bytes(probe)?;
    pause(timing.probe_delay, interrupted)?;

    let reply = collect_response(port, timing.probe_window, timing.poll_interval);
    if reply.is_empty() {
        debug!("No reply to probe {}", to_hex(probe));
    } else {
        info!("Device responded: {}", to_hex(&reply));
    }
    Ok(reply)
}
