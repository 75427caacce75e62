//! Raw firmware streaming.
//!
//! Fire-and-forget: chunks are written in file order with a pacing delay so
//! the bridge's receive buffer does not overrun. Nothing is acknowledged, so
//! a dropped chunk cannot be detected here.

use crate::error::{Error, Result};
use crate::pause;
use crate::port::Port;
use log::{debug, trace};
use std::time::Duration;

/// Streaming parameters.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Bytes per write.
    pub chunk_size: usize,
    /// Report progress each time this many more bytes have gone out.
    pub progress_interval: usize,
    /// Pause after every chunk.
    pub pacing: Duration,
}

/// Totals of a completed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Bytes written.
    pub bytes: usize,
    /// Writes issued.
    pub chunks: usize,
}

/// Write `data` to `port` in chunks.
///
/// `progress(sent, total)` fires whenever a multiple of
/// `options.progress_interval` is crossed, and once more at completion.
/// The interrupt checker is consulted before every chunk.
pub fn stream_firmware<P, F>(
    port: &mut P,
    data: &[u8],
    options: StreamOptions,
    interrupted: &dyn Fn() -> bool,
    mut progress: F,
) -> Result<StreamStats>
where
    P: Port + ?Sized,
    F: FnMut(usize, usize),
{
    let total = data.len();
    let chunk_size = options.chunk_size.max(1);
    let interval = options.progress_interval.max(1);
    let mut stats = StreamStats::default();

    debug!("Streaming {total} bytes in {chunk_size}-byte chunks");

    for chunk in data.chunks(chunk_size) {
        if interrupted() {
            return Err(Error::Interrupted);
        }

        port.write_all_bytes(chunk)?;
        let before = stats.bytes;
        stats.bytes += chunk.len();
        stats.chunks += 1;
        trace!("Chunk {} written ({} bytes)", stats.chunks, chunk.len());

        if stats.bytes / interval > before / interval || stats.bytes == total {
            progress(stats.bytes, total);
        }

        pause(options.pacing, interrupted)?;
    }

    if total == 0 {
        progress(0, 0);
    }

    debug!("Streamed {} bytes in {} chunks", stats.bytes, stats.chunks);
    Ok(stats)
}
